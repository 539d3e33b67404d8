use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::notify::template::Rendered;
use crate::notify::NotifyError;

/// SMTP email channel.
#[derive(Clone)]
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?.port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = config
            .from
            .parse()
            .map_err(|e| NotifyError::BadRecipient(format!("from address: {e}")))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Send one message. Returns the SMTP reply code as the message id.
    pub async fn send(&self, to: &str, rendered: &Rendered) -> Result<Option<String>, NotifyError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::BadRecipient(format!("{to}: {e}")))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&rendered.subject)
            .multipart(MultiPart::alternative_plain_html(
                rendered.text.clone(),
                rendered.html.clone(),
            ))?;
        let response = self.transport.send(message).await?;
        Ok(Some(response.code().to_string()))
    }
}
