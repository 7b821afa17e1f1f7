//! Payment reconciliation: inquiry, refunds and the refund request queue.
//!
//! Every state change on a ticket goes through a per-ticket lock and a
//! compare-and-set on `payment_status`, so concurrent operators and pollers
//! cannot interleave a transition.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MissingRefPolicy;
use crate::gateway::{bounded, GatewayError, GatewayRegistry};
use crate::models::{
    PaymentMethod, PaymentStatus, RefundRequest, RefundStatus, Ticket, TicketStatus,
};
use crate::notify::RefundNotifier;
use crate::services::locks::TicketLocks;
use crate::store::{PaymentUpdate, Store, StoreError, StoreResult};
use crate::utils::{AppError, AppResult};

const OPERATOR_REFUND_REASON: &str = "Refund issued by operator";

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerPolicy {
    pub missing_ref: MissingRefPolicy,
    pub gateway_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryReport {
    pub found: bool,
    pub payment_status: PaymentStatus,
}

/// Ticket state after a refund decision, with the request it touched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDecision {
    pub ticket: Ticket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_request: Option<RefundRequest>,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    gateways: GatewayRegistry,
    notifier: Arc<dyn RefundNotifier>,
    locks: TicketLocks,
    policy: ReconcilerPolicy,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn RefundNotifier>,
        policy: ReconcilerPolicy,
    ) -> Self {
        Self {
            store,
            gateways,
            notifier,
            locks: TicketLocks::new(),
            policy,
        }
    }

    async fn ticket(&self, id: Uuid) -> AppResult<Ticket> {
        self.store
            .get_ticket(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {id} not found")))
    }

    /// Compare-and-set limited to the payment state machine's edges.
    async fn transition(
        &self,
        ticket: &Ticket,
        expected: PaymentStatus,
        update: PaymentUpdate,
    ) -> StoreResult<Ticket> {
        if !expected.can_transition_to(update.status) {
            return Err(StoreError::IllegalTransition {
                from: expected,
                to: update.status,
            });
        }
        self.store.transition_payment(ticket.id, expected, update).await
    }

    /// Applies `update` if the ticket is still in `expected`. If another writer
    /// got there first, the winner's state is returned.
    async fn settle(
        &self,
        ticket: &Ticket,
        expected: PaymentStatus,
        update: PaymentUpdate,
    ) -> AppResult<Ticket> {
        match self.transition(ticket, expected, update).await {
            Ok(ticket) => Ok(ticket),
            Err(StoreError::StatusChanged { actual, .. }) => {
                warn!(ticket = %ticket.unique_id, %expected, %actual, "Payment status changed concurrently");
                self.ticket(ticket.id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Asks the provider for the verdict on a pending payment and records it.
    ///
    /// A ticket that has left `Pending` is reported as stored, so repeating an
    /// inquiry never flips a settled payment.
    pub async fn inquire_payment(&self, unique_id: &str) -> AppResult<InquiryReport> {
        let Some(found) = self.store.get_ticket_by_unique_id(unique_id).await? else {
            info!(ticket = %unique_id, "Inquiry for unknown ticket");
            return Ok(InquiryReport {
                found: false,
                payment_status: PaymentStatus::Cancelled,
            });
        };

        let _guard = self.locks.acquire(found.id).await;
        let ticket = self.ticket(found.id).await?;

        if ticket.refund_provider_ref.is_some() {
            let ticket = if ticket.payment_status == PaymentStatus::Paid {
                self.settle(
                    &ticket,
                    PaymentStatus::Paid,
                    PaymentUpdate::to(PaymentStatus::RefundProcessing),
                )
                .await?
            } else {
                ticket
            };
            return Ok(InquiryReport {
                found: true,
                payment_status: ticket.payment_status,
            });
        }

        if ticket.payment_status != PaymentStatus::Pending {
            return Ok(InquiryReport {
                found: true,
                payment_status: ticket.payment_status,
            });
        }

        let gateway = self.gateways.get(ticket.payment_method)?;
        let verdict = match ticket.provider_transaction_ref {
            None => self.verdict_without_reference(&ticket),
            Some(_) => {
                let outcome =
                    bounded(self.policy.gateway_timeout, gateway.inquire(&ticket)).await?;
                if outcome.paid {
                    PaymentStatus::Paid
                } else {
                    PaymentStatus::Failed
                }
            }
        };

        let ticket = self
            .settle(&ticket, PaymentStatus::Pending, PaymentUpdate::to(verdict))
            .await?;
        info!(ticket = %ticket.unique_id, status = %ticket.payment_status, "Payment inquiry settled");
        Ok(InquiryReport {
            found: true,
            payment_status: ticket.payment_status,
        })
    }

    fn verdict_without_reference(&self, ticket: &Ticket) -> PaymentStatus {
        match (ticket.payment_method, self.policy.missing_ref) {
            (PaymentMethod::Qpay, MissingRefPolicy::MarkPaid) => {
                warn!(
                    ticket = %ticket.unique_id,
                    "QPay ticket has no PUN, marking Paid under the legacy missing-reference policy"
                );
                PaymentStatus::Paid
            }
            _ => PaymentStatus::Failed,
        }
    }

    /// Refunds a paid ticket at its provider.
    ///
    /// The refund correlation id is persisted before dispatch and reused when
    /// the same amount is retried after a timeout.
    pub async fn process_refund(&self, ticket_id: Uuid, amount: Decimal) -> AppResult<RefundDecision> {
        if amount <= Decimal::ZERO {
            return Err(AppError::ValidationError(
                "refund amount must be greater than zero".to_string(),
            ));
        }

        let _guard = self.locks.acquire(ticket_id).await;
        let ticket = self.ticket(ticket_id).await?;
        if ticket.payment_status != PaymentStatus::Paid {
            return Err(AppError::InvalidState(format!(
                "ticket {} cannot be refunded while {}",
                ticket.unique_id, ticket.payment_status
            )));
        }
        if amount > ticket.price {
            return Err(AppError::ValidationError(format!(
                "refund amount {amount} exceeds the ticket price {}",
                ticket.price
            )));
        }
        let gateway = self.gateways.get(ticket.payment_method)?;

        let (mut request, opened_by_operator) = self
            .prepare_refund_request(&ticket, amount, || gateway.new_refund_reference())
            .await?;
        let reference = request
            .provider_correlation_id
            .clone()
            .unwrap_or_else(|| gateway.new_refund_reference());

        let outcome = match bounded(
            self.policy.gateway_timeout,
            gateway.refund(&ticket, amount, &reference),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e @ GatewayError::Refused { .. }) => {
                // The attempt is over; the next one needs a fresh reference.
                request.provider_correlation_id = None;
                if opened_by_operator {
                    // A refusal must not leave an operator's request blocking the
                    // buyer's queue.
                    request.status = RefundStatus::Rejected;
                }
                request.updated_at = Utc::now();
                if let Err(save_err) = self.store.save_refund_request(&request).await {
                    warn!(ticket = %ticket.unique_id, error = %save_err, "Could not close refund attempt");
                }
                return Err(e.into());
            }
            Err(e) => {
                warn!(ticket = %ticket.unique_id, reference = %reference, error = %e, "Refund dispatch did not complete");
                return Err(e.into());
            }
        };

        let persisted = async {
            let ticket = self
                .transition(
                    &ticket,
                    PaymentStatus::Paid,
                    PaymentUpdate::to(PaymentStatus::RefundProcessing)
                        .with_refund_ref(outcome.refund_ref.clone()),
                )
                .await?;
            request.status = RefundStatus::ProcessingRefund;
            request.updated_at = Utc::now();
            self.store.save_refund_request(&request).await?;
            Ok::<_, StoreError>(ticket)
        }
        .await;

        match persisted {
            Ok(ticket) => {
                info!(
                    ticket = %ticket.unique_id,
                    refund_ref = %outcome.refund_ref,
                    %amount,
                    "Refund accepted by provider"
                );
                Ok(RefundDecision {
                    ticket,
                    refund_request: Some(request),
                })
            }
            Err(e) => {
                error!(
                    ticket = %ticket.unique_id,
                    refund_ref = %outcome.refund_ref,
                    provider_response = %outcome.raw,
                    error = %e,
                    "Refund accepted by provider but not recorded"
                );
                Err(AppError::PersistenceFailure(format!(
                    "refund {} for ticket {} was accepted by the provider but could not be recorded",
                    outcome.refund_ref, ticket.unique_id
                )))
            }
        }
    }

    /// Open request for this refund with a correlation id saved, creating one
    /// for operator-initiated refunds. The flag marks a request that was opened
    /// by an operator rather than the buyer.
    async fn prepare_refund_request(
        &self,
        ticket: &Ticket,
        amount: Decimal,
        new_reference: impl Fn() -> String,
    ) -> AppResult<(RefundRequest, bool)> {
        let now = Utc::now();
        match self.store.open_refund_request(ticket.id).await? {
            Some(mut request) => {
                let reusable = request.provider_correlation_id.is_some()
                    && request.refund_amount == amount;
                if !reusable {
                    request.provider_correlation_id = Some(new_reference());
                    request.refund_amount = amount;
                }
                request.updated_at = now;
                self.store.save_refund_request(&request).await?;
                let opened_by_operator = request.reason == OPERATOR_REFUND_REASON;
                Ok((request, opened_by_operator))
            }
            None => {
                let request = RefundRequest {
                    id: Uuid::new_v4(),
                    ticket_id: ticket.id,
                    reason: OPERATOR_REFUND_REASON.to_string(),
                    payment_method: ticket.payment_method,
                    status: RefundStatus::PendingApproval,
                    refund_amount: amount,
                    provider_correlation_id: Some(new_reference()),
                    created_at: now,
                    updated_at: now,
                };
                self.store.insert_refund_request(&request).await?;
                Ok((request, true))
            }
        }
    }

    /// Queues a buyer's refund request for operator approval.
    pub async fn request_refund(&self, unique_id: &str, reason: &str) -> AppResult<RefundRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::ValidationError("reason is required".to_string()));
        }
        let found = self
            .store
            .get_ticket_by_unique_id(unique_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {unique_id} not found")))?;

        let _guard = self.locks.acquire(found.id).await;
        let ticket = self.ticket(found.id).await?;

        if self.store.open_refund_request(ticket.id).await?.is_some() {
            return Err(AppError::AlreadyRequested(format!(
                "a refund for ticket {unique_id} is already in progress"
            )));
        }
        if ticket.payment_status != PaymentStatus::Paid {
            return Err(AppError::InvalidState(format!(
                "ticket {unique_id} cannot be refunded while {}",
                ticket.payment_status
            )));
        }

        let now = Utc::now();
        let request = RefundRequest {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            reason: reason.to_string(),
            payment_method: ticket.payment_method,
            status: RefundStatus::PendingApproval,
            refund_amount: ticket.price,
            provider_correlation_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_refund_request(&request).await?;
        info!(ticket = %ticket.unique_id, refund_request_id = %request.id, "Refund requested");

        if let Err(e) = self.notifier.refund_requested(&ticket, &request).await {
            warn!(ticket = %ticket.unique_id, error = %e, "Operator notification failed");
        }
        Ok(request)
    }

    /// Moves the ticket's open request to `status`, if there is one.
    async fn close_open_request(
        &self,
        ticket_id: Uuid,
        status: RefundStatus,
    ) -> AppResult<Option<RefundRequest>> {
        let Some(mut request) = self.store.open_refund_request(ticket_id).await? else {
            return Ok(None);
        };
        request.status = status;
        request.updated_at = Utc::now();
        self.store.save_refund_request(&request).await?;
        Ok(Some(request))
    }

    pub async fn reject_refund_request(&self, ticket_id: Uuid) -> AppResult<RefundDecision> {
        let _guard = self.locks.acquire(ticket_id).await;
        let ticket = self.ticket(ticket_id).await?;

        let ticket = match ticket.payment_status {
            PaymentStatus::RefundRejectedByOperator => ticket,
            status @ (PaymentStatus::Paid | PaymentStatus::RefundProcessing) => {
                self.transition(
                    &ticket,
                    status,
                    PaymentUpdate::to(PaymentStatus::RefundRejectedByOperator),
                )
                .await?
            }
            other => {
                return Err(AppError::InvalidState(format!(
                    "ticket {} has no refund to reject while {other}",
                    ticket.unique_id
                )))
            }
        };

        let refund_request = match self.close_open_request(ticket.id, RefundStatus::Rejected).await? {
            Some(request) => Some(request),
            None => self.store.latest_refund_request(ticket.id).await?,
        };
        info!(ticket = %ticket.unique_id, "Refund rejected by operator");
        Ok(RefundDecision {
            ticket,
            refund_request,
        })
    }

    /// Records that the provider has paid out a refund in progress.
    pub async fn complete_refund(&self, ticket_id: Uuid) -> AppResult<RefundDecision> {
        let _guard = self.locks.acquire(ticket_id).await;
        let ticket = self.ticket(ticket_id).await?;

        let ticket = match ticket.payment_status {
            PaymentStatus::RefundCompleted => ticket,
            PaymentStatus::RefundProcessing => {
                self.transition(
                    &ticket,
                    PaymentStatus::RefundProcessing,
                    PaymentUpdate::to(PaymentStatus::RefundCompleted),
                )
                .await?
            }
            other => {
                return Err(AppError::InvalidState(format!(
                    "ticket {} has no refund in progress while {other}",
                    ticket.unique_id
                )))
            }
        };

        let refund_request = match self.close_open_request(ticket.id, RefundStatus::Completed).await? {
            Some(request) => Some(request),
            None => self.store.latest_refund_request(ticket.id).await?,
        };
        info!(ticket = %ticket.unique_id, "Refund completed");
        Ok(RefundDecision {
            ticket,
            refund_request,
        })
    }

    /// Cancels a booking. An unpaid ticket's payment is cancelled with it; a
    /// paid one has to be refunded instead.
    pub async fn cancel_ticket(&self, ticket_id: Uuid) -> AppResult<Ticket> {
        let _guard = self.locks.acquire(ticket_id).await;
        let ticket = self.ticket(ticket_id).await?;
        if ticket.status == TicketStatus::Cancelled {
            return Ok(ticket);
        }

        let ticket = match ticket.payment_status {
            PaymentStatus::Pending => {
                self.transition(
                    &ticket,
                    PaymentStatus::Pending,
                    PaymentUpdate::to(PaymentStatus::Cancelled),
                )
                .await?
            }
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::RefundCompleted => {
                ticket
            }
            other => {
                return Err(AppError::InvalidState(format!(
                    "ticket {} cannot be cancelled while {other}",
                    ticket.unique_id
                )))
            }
        };

        let ticket = self
            .store
            .set_ticket_status(ticket.id, TicketStatus::Cancelled, Utc::now())
            .await?;
        info!(ticket = %ticket.unique_id, "Ticket cancelled");
        Ok(ticket)
    }

    pub async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
    ) -> AppResult<Vec<RefundRequest>> {
        Ok(self.store.list_refund_requests(status).await?)
    }
}
