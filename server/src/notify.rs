//! Operator notification for new refund requests.

use async_trait::async_trait;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use std::sync::Arc;

use crate::config::OperatorMailConfig;
use crate::models::{RefundRequest, Ticket};

#[async_trait]
pub trait RefundNotifier: Send + Sync {
    async fn refund_requested(&self, ticket: &Ticket, request: &RefundRequest)
        -> Result<(), String>;
}

/// Subject and plain-text body of the operator mail.
pub fn refund_request_message(ticket: &Ticket, request: &RefundRequest) -> (String, String) {
    let subject = format!("Refund requested for ticket {}", ticket.unique_id);
    let body = format!(
        "A refund has been requested and is awaiting approval.\n\n\
         Ticket: {}\n\
         Buyer: {}\n\
         Payment method: {}\n\
         Amount: {}\n\
         Reason: {}\n\
         Request id: {}\n",
        ticket.unique_id,
        ticket.buyer_email,
        ticket.payment_method,
        request.refund_amount.round_dp(2),
        request.reason,
        request.id,
    );
    (subject, body)
}

/// Writes the notification to the log. Used when no operator mailbox is configured.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl RefundNotifier for LogNotifier {
    async fn refund_requested(
        &self,
        ticket: &Ticket,
        request: &RefundRequest,
    ) -> Result<(), String> {
        tracing::info!(
            ticket = %ticket.unique_id,
            refund_request_id = %request.id,
            amount = %request.refund_amount,
            reason = %request.reason,
            "Refund requested, awaiting operator approval"
        );
        Ok(())
    }
}

/// Mails the operator through SES.
pub struct SesNotifier {
    ses: SesClient,
    from: String,
    to: String,
}

impl SesNotifier {
    pub fn new(ses: SesClient, mail: &OperatorMailConfig) -> Self {
        Self {
            ses,
            from: mail.from_email.clone(),
            to: mail.operator_email.clone(),
        }
    }

    async fn send(&self, subject: String, body_text: String) -> Result<(), String> {
        let subject = Content::builder()
            .data(subject)
            .build()
            .map_err(|e| e.to_string())?;
        let text = Content::builder()
            .data(body_text)
            .build()
            .map_err(|e| e.to_string())?;
        let body = Body::builder().text(text).build();
        let message = Message::builder().subject(subject).body(body).build();

        self.ses
            .send_email()
            .from_email_address(&self.from)
            .destination(Destination::builder().to_addresses(&self.to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| aws_sdk_sesv2::error::DisplayErrorContext(e).to_string())?;
        Ok(())
    }
}

#[async_trait]
impl RefundNotifier for SesNotifier {
    async fn refund_requested(
        &self,
        ticket: &Ticket,
        request: &RefundRequest,
    ) -> Result<(), String> {
        let (subject, body) = refund_request_message(ticket, request);
        self.send(subject, body).await?;
        tracing::info!(
            to = %self.to,
            ticket = %ticket.unique_id,
            refund_request_id = %request.id,
            "Refund request mailed to operator"
        );
        Ok(())
    }
}

/// SES-backed notifier when an operator mailbox is configured, the log otherwise.
pub async fn build_notifier(mail: Option<&OperatorMailConfig>) -> Arc<dyn RefundNotifier> {
    let Some(mail) = mail else {
        tracing::warn!("REFUND_OPERATOR_EMAIL not set, refund requests are only logged");
        return Arc::new(LogNotifier);
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let ses = match &mail.ses_region {
        Some(region) => {
            let ses_config = aws_config
                .to_builder()
                .region(aws_config::Region::new(region.clone()))
                .build();
            SesClient::new(&ses_config)
        }
        None => SesClient::new(&aws_config),
    };
    Arc::new(SesNotifier::new(ses, mail))
}
