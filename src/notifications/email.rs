//! Outbound email for account verification and user invitations.
//!
//! Uses the SMTP settings from the main config file. When SMTP is not
//! configured the service logs a warning and skips sending, so local
//! development works without a mail server.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Service for sending platform emails
#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Send the address-verification email after a manager signs up
    pub async fn send_verification_email(&self, to_email: &str, verify_url: &str) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping verification email to {}",
                to_email
            );
            return Ok(());
        }

        let subject = "Verify your BotForge email address";
        let html_body = render_verification_html(verify_url);
        let text_body = render_verification_text(verify_url);

        self.send_email(to_email, subject, &html_body, &text_body)
            .await
    }

    /// Send an invitation email to an end user
    pub async fn send_invitation_email(
        &self,
        to_email: &str,
        inviter_name: &str,
        accept_url: &str,
        expires_in_days: i64,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping invitation email to {}",
                to_email
            );
            return Ok(());
        }

        let subject = format!("{} invited you to BotForge", inviter_name);
        let html_body = render_invitation_html(inviter_name, accept_url, expires_in_days);
        let text_body = render_invitation_text(inviter_name, accept_url, expires_in_days);

        self.send_email(to_email, &subject, &html_body, &text_body)
            .await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        // Build the from mailbox with name
        let from_mailbox = format!("{} <{}>", self.config.from_name, from_address);
        let from: Mailbox = from_mailbox.parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        // Build SMTP transport
        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(
            to = %to_email,
            subject = %subject,
            "Email sent successfully"
        );

        Ok(())
    }
}

/// Shared email chrome wrapping a title, body paragraphs, and a call-to-action
fn render_layout(title: &str, body_html: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif;
            margin: 0;
            padding: 0;
            background-color: #f4f4f7;
        }}
        .container {{
            max-width: 560px;
            margin: 0 auto;
            padding: 40px 20px;
        }}
        .card {{
            background-color: #ffffff;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0, 0, 0, 0.06);
            overflow: hidden;
        }}
        .header {{
            background: linear-gradient(135deg, #7c3aed 0%, #6d28d9 100%);
            color: white;
            padding: 28px 24px;
            text-align: center;
        }}
        .header h1 {{
            margin: 0;
            font-size: 22px;
            font-weight: 600;
        }}
        .content {{
            padding: 32px 24px;
        }}
        .content p {{
            margin: 0 0 16px;
            color: #374151;
            line-height: 1.6;
        }}
        .button-container {{
            text-align: center;
            margin: 32px 0;
        }}
        .button {{
            display: inline-block;
            background: linear-gradient(135deg, #7c3aed 0%, #6d28d9 100%);
            color: white !important;
            text-decoration: none;
            padding: 14px 32px;
            border-radius: 6px;
            font-weight: 500;
            font-size: 16px;
        }}
        .note {{
            color: #6b7280;
            font-size: 13px;
            text-align: center;
            margin-top: 24px;
        }}
        .footer {{
            padding: 24px;
            text-align: center;
            color: #9ca3af;
            font-size: 12px;
            border-top: 1px solid #f3f4f6;
        }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header">
                <h1>{title}</h1>
            </div>
            <div class="content">
{body_html}
            </div>
            <div class="footer">
                <p>Sent by BotForge - Build and run AI chatbots</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
        title = title,
        body_html = body_html,
    )
}

/// Render the HTML version of the verification email
fn render_verification_html(verify_url: &str) -> String {
    let body = format!(
        r#"                <p>Hi there,</p>
                <p>Thanks for signing up for BotForge. Confirm your email address to activate your account.</p>
                <div class="button-container">
                    <a href="{verify_url}" class="button">Verify Email</a>
                </div>
                <p class="note">If you didn't create a BotForge account, you can safely ignore this email.</p>"#,
        verify_url = verify_url,
    );
    render_layout("Verify Your Email", &body)
}

/// Render the plain text version of the verification email
fn render_verification_text(verify_url: &str) -> String {
    format!(
        r#"Verify Your Email

Hi there,

Thanks for signing up for BotForge. Confirm your email address to activate
your account by visiting:

{verify_url}

If you didn't create a BotForge account, you can safely ignore this email.

---
Sent by BotForge - Build and run AI chatbots"#,
        verify_url = verify_url,
    )
}

/// Render the HTML version of the invitation email
fn render_invitation_html(inviter_name: &str, accept_url: &str, expires_in_days: i64) -> String {
    let body = format!(
        r#"                <p>Hi there,</p>
                <p><strong>{inviter_name}</strong> has invited you to chat with their bots on BotForge.</p>
                <div class="button-container">
                    <a href="{accept_url}" class="button">Accept Invitation</a>
                </div>
                <p class="note">This invitation will expire in {expires_in_days} days. If you didn't expect this invitation, you can safely ignore this email.</p>"#,
        inviter_name = html_escape(inviter_name),
        accept_url = accept_url,
        expires_in_days = expires_in_days,
    );
    render_layout("You're Invited", &body)
}

/// Render the plain text version of the invitation email
fn render_invitation_text(inviter_name: &str, accept_url: &str, expires_in_days: i64) -> String {
    format!(
        r#"You're Invited

Hi there,

{inviter_name} has invited you to chat with their bots on BotForge.

To accept this invitation, visit:
{accept_url}

This invitation will expire in {expires_in_days} days.

If you didn't expect this invitation, you can safely ignore this email.

---
Sent by BotForge - Build and run AI chatbots"#,
        inviter_name = inviter_name,
        accept_url = accept_url,
        expires_in_days = expires_in_days,
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
