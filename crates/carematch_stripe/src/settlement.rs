//! Payment settlement: held charge at booking time, capture or release afterwards, and
//! reconciliation from processor webhooks.

use carematch_common::bounded;
use carematch_common::models::{
    BookingSession, ClientProfile, PaymentStatus, SessionPayment, TherapistProfile,
    SYNTHETIC_PAYMENT_PREFIX,
};
use carematch_common::services::{HeldChargeRequest, PaymentIntentResult, PaymentService};
use carematch_config::StripeConfig;
use carematch_db::{DbTransaction, SqlSessionPaymentRepository};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::StripeError;
use crate::logic::{platform_fee_cents, PaymentEventKind, StripeEvent};

/// What a webhook event did to the payment ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Settled {
        booking_id: String,
        status: PaymentStatus,
    },
    /// The matching payment had already reached a final status.
    AlreadySettled { booking_id: String },
    /// No payment carries this reference.
    Unmatched,
    /// Event type does not settle payments.
    Ignored,
}

/// Fails with `InconsistentState` when the payment disagrees with its own totals, or
/// with the booking it belongs to.
pub fn check_consistency(
    booking: Option<&BookingSession>,
    payment: &SessionPayment,
) -> Result<(), StripeError> {
    if !payment.is_balanced() {
        error!(
            booking_id = %payment.booking_session_id,
            total = payment.total_amount_cents,
            subsidy = payment.subsidy_used_cents,
            out_of_pocket = payment.out_of_pocket_cents,
            "Session payment does not balance"
        );
        return Err(StripeError::InconsistentState(format!(
            "payment for booking {} does not balance: {} != {} + {}",
            payment.booking_session_id,
            payment.total_amount_cents,
            payment.subsidy_used_cents,
            payment.out_of_pocket_cents
        )));
    }
    if let Some(booking) = booking {
        let matches = booking.id == payment.booking_session_id
            && booking.total_cost_cents == payment.total_amount_cents
            && booking.subsidy_used_cents() == payment.subsidy_used_cents
            && booking.out_of_pocket_cents == payment.out_of_pocket_cents;
        if !matches {
            error!(
                booking_id = %booking.id,
                payment_reference = %payment.external_payment_reference,
                "Session payment does not match its booking"
            );
            return Err(StripeError::InconsistentState(format!(
                "payment {} does not match the totals of booking {}",
                payment.external_payment_reference, booking.id
            )));
        }
    }
    Ok(())
}

pub struct SettlementOrchestrator<P> {
    payments: Arc<P>,
    repository: SqlSessionPaymentRepository,
    currency: String,
    platform_fee_percent: i64,
    call_timeout: Duration,
}

impl<P> SettlementOrchestrator<P>
where
    P: PaymentService<Error = StripeError>,
{
    pub fn new(
        payments: Arc<P>,
        repository: SqlSessionPaymentRepository,
        currency: impl Into<String>,
        platform_fee_percent: i64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            payments,
            repository,
            currency: currency.into(),
            platform_fee_percent,
            call_timeout,
        }
    }

    pub fn from_config(
        payments: Arc<P>,
        repository: SqlSessionPaymentRepository,
        config: &StripeConfig,
        call_timeout: Duration,
    ) -> Self {
        Self::new(
            payments,
            repository,
            config.currency(),
            config.platform_fee_percent(),
            call_timeout,
        )
    }

    pub fn repository(&self) -> &SqlSessionPaymentRepository {
        &self.repository
    }

    /// Creates the payment for a booking whose row is already written to `tx`.
    ///
    /// A zero out-of-pocket amount gets a synthetic, already succeeded record and no
    /// external call. Otherwise a held charge is created first and the pending record
    /// is written to `tx`; if that write fails the hold is cancelled before returning.
    /// Should the caller's commit fail afterwards it must call [`Self::compensate`].
    #[instrument(skip_all, fields(booking_id = %booking.id))]
    pub async fn settle_booking(
        &self,
        tx: &mut DbTransaction<'_>,
        booking: &BookingSession,
        client: &ClientProfile,
        therapist: &TherapistProfile,
    ) -> Result<SessionPayment, StripeError> {
        let now = Utc::now();
        let mut payment = SessionPayment {
            booking_session_id: booking.id.clone(),
            total_amount_cents: booking.total_cost_cents,
            subsidy_used_cents: booking.subsidy_used_cents(),
            out_of_pocket_cents: booking.out_of_pocket_cents,
            platform_fee_cents: 0,
            currency: self.currency.clone(),
            external_payment_reference: String::new(),
            status: PaymentStatus::Pending,
            charged_at: None,
            created_at: now,
        };
        check_consistency(Some(booking), &payment)?;

        if payment.out_of_pocket_cents == 0 {
            payment.external_payment_reference =
                format!("{}{}", SYNTHETIC_PAYMENT_PREFIX, Uuid::new_v4().simple());
            payment.status = PaymentStatus::Succeeded;
            payment.charged_at = Some(now);
            self.repository.insert(tx, &payment).await?;
            info!(
                payment_reference = %payment.external_payment_reference,
                "Fully subsidized session, recorded synthetic payment"
            );
            return Ok(payment);
        }

        let payer = client.payment_customer_id.as_deref().ok_or_else(|| {
            StripeError::PaymentSetup(format!("client {} has no payment method on file", client.id))
        })?;
        let payee = therapist.payout_account_id.as_deref().ok_or_else(|| {
            StripeError::PaymentSetup(format!(
                "therapist {} has no connected payout account",
                therapist.id
            ))
        })?;

        payment.platform_fee_cents = platform_fee_cents(
            payment.total_amount_cents,
            self.platform_fee_percent,
            payment.out_of_pocket_cents,
        );
        let payment_method = self
            .call(self.payments.default_payment_method(payer))
            .await?
            .ok_or_else(|| {
                StripeError::PaymentSetup(format!(
                    "client {} has no default payment method saved",
                    client.id
                ))
            })?;
        let request = HeldChargeRequest {
            amount_cents: payment.out_of_pocket_cents,
            currency: self.currency.clone(),
            payer_reference: payer.to_string(),
            payment_method,
            payee_account: payee.to_string(),
            platform_fee_cents: payment.platform_fee_cents,
            booking_id: booking.id.clone(),
            idempotency_key: format!("booking-{}", booking.id),
            description: Some(format!("Therapy session with {}", therapist.full_name)),
        };
        let intent = self
            .call(self.payments.create_held_charge(request))
            .await?;
        payment.external_payment_reference = intent.id.clone();
        if !intent.is_held() {
            warn!(
                payment_reference = %payment.external_payment_reference,
                status = %intent.status,
                "Charge was not authorized, releasing it"
            );
            self.compensate(&payment).await;
            return Err(StripeError::PaymentSetup(format!(
                "payment for booking {} was not authorized (status {})",
                booking.id, intent.status
            )));
        }
        info!(
            payment_reference = %payment.external_payment_reference,
            amount = payment.out_of_pocket_cents,
            fee = payment.platform_fee_cents,
            "Held charge created"
        );

        if let Err(e) = self.repository.insert(tx, &payment).await {
            error!(
                payment_reference = %payment.external_payment_reference,
                "Failed to record held charge, releasing it: {}", e
            );
            self.compensate(&payment).await;
            return Err(e.into());
        }
        Ok(payment)
    }

    /// Releases a hold whose booking never committed. Failures are logged only.
    pub async fn compensate(&self, payment: &SessionPayment) {
        if payment.is_synthetic() {
            return;
        }
        match self
            .call(
                self.payments
                    .cancel_payment_intent(&payment.external_payment_reference),
            )
            .await
        {
            Ok(_) => warn!(
                booking_id = %payment.booking_session_id,
                payment_reference = %payment.external_payment_reference,
                "Released held charge of an uncommitted booking"
            ),
            Err(e) => error!(
                booking_id = %payment.booking_session_id,
                payment_reference = %payment.external_payment_reference,
                "Could not release held charge of an uncommitted booking: {}", e
            ),
        }
    }

    /// Captures the held charge. Capturing an already captured payment is a no-op.
    #[instrument(skip(self))]
    pub async fn capture(&self, booking_id: &str) -> Result<SessionPayment, StripeError> {
        let payment = self.load(booking_id).await?;
        match payment.status {
            PaymentStatus::Succeeded => return Ok(payment),
            PaymentStatus::Failed => {
                return Err(StripeError::InvalidTransition {
                    from: PaymentStatus::Failed.to_string(),
                    to: PaymentStatus::Succeeded.to_string(),
                })
            }
            PaymentStatus::Pending => {}
        }

        if !payment.is_synthetic() {
            let reference = payment.external_payment_reference.as_str();
            let current = self
                .call(self.payments.retrieve_payment_intent(reference))
                .await?;
            if current.is_canceled() {
                self.repository
                    .settle(booking_id, PaymentStatus::Failed, None)
                    .await?;
                return Err(StripeError::InvalidTransition {
                    from: "canceled".to_string(),
                    to: "captured".to_string(),
                });
            }
            if !current.is_captured() {
                let captured = self
                    .call(self.payments.capture_payment_intent(reference))
                    .await?;
                self.ensure_status(&captured, "succeeded")?;
            }
        }

        self.repository
            .settle(booking_id, PaymentStatus::Succeeded, Some(Utc::now()))
            .await?;
        info!(payment_reference = %payment.external_payment_reference, "Payment captured");
        self.load(booking_id).await
    }

    /// Cancels the held charge. Releasing an already released payment is a no-op, and a
    /// synthetic payment has nothing to release.
    #[instrument(skip(self))]
    pub async fn release(&self, booking_id: &str) -> Result<SessionPayment, StripeError> {
        let payment = self.load(booking_id).await?;
        if payment.is_synthetic() || payment.status == PaymentStatus::Failed {
            return Ok(payment);
        }
        if payment.status == PaymentStatus::Succeeded {
            return Err(StripeError::InvalidTransition {
                from: PaymentStatus::Succeeded.to_string(),
                to: "released".to_string(),
            });
        }

        let reference = payment.external_payment_reference.as_str();
        let current = self
            .call(self.payments.retrieve_payment_intent(reference))
            .await?;
        if current.is_captured() {
            self.repository
                .settle(booking_id, PaymentStatus::Succeeded, Some(Utc::now()))
                .await?;
            return Err(StripeError::InvalidTransition {
                from: "captured".to_string(),
                to: "released".to_string(),
            });
        }
        if !current.is_canceled() {
            let canceled = self
                .call(self.payments.cancel_payment_intent(reference))
                .await?;
            self.ensure_status(&canceled, "canceled")?;
        }

        self.repository
            .settle(booking_id, PaymentStatus::Failed, None)
            .await?;
        info!(payment_reference = %payment.external_payment_reference, "Held charge released");
        self.load(booking_id).await
    }

    /// Applies a verified `payment_intent.*` event to the matching pending payment.
    #[instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn reconcile_event(
        &self,
        event: &StripeEvent,
    ) -> Result<ReconcileOutcome, StripeError> {
        let Some(kind) = event.payment_event_kind() else {
            info!("Ignoring Stripe event");
            return Ok(ReconcileOutcome::Ignored);
        };
        let intent = event.payment_intent()?;

        let Some(payment) = self.repository.find_by_reference(&intent.id).await? else {
            warn!(payment_reference = %intent.id, "Stripe event for unknown payment");
            return Ok(ReconcileOutcome::Unmatched);
        };
        check_consistency(None, &payment)?;

        let (status, charged_at) = match kind {
            PaymentEventKind::Succeeded => (PaymentStatus::Succeeded, Some(Utc::now())),
            PaymentEventKind::Canceled | PaymentEventKind::Failed => (PaymentStatus::Failed, None),
        };
        let booking_id = payment.booking_session_id;
        if self.repository.settle(&booking_id, status, charged_at).await? {
            info!(booking_id = %booking_id, payment_reference = %intent.id, status = %status, "Payment reconciled from webhook");
            Ok(ReconcileOutcome::Settled { booking_id, status })
        } else {
            info!(booking_id = %booking_id, payment_reference = %intent.id, "Payment already settled, event ignored");
            Ok(ReconcileOutcome::AlreadySettled { booking_id })
        }
    }

    /// Loads the payment and checks it balances.
    pub async fn load(&self, booking_id: &str) -> Result<SessionPayment, StripeError> {
        let payment = self
            .repository
            .find_by_booking(booking_id)
            .await?
            .ok_or_else(|| StripeError::NotFound(format!("booking {}", booking_id)))?;
        check_consistency(None, &payment)?;
        Ok(payment)
    }

    fn ensure_status(&self, intent: &PaymentIntentResult, expected: &str) -> Result<(), StripeError> {
        if intent.status == expected {
            Ok(())
        } else {
            Err(StripeError::ApiError {
                status_code: 502,
                message: format!(
                    "payment intent {} is {} after the call, expected {}",
                    intent.id, intent.status, expected
                ),
                code: None,
            })
        }
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, StripeError>
    where
        F: Future<Output = Result<T, StripeError>>,
    {
        bounded("stripe", self.call_timeout, fut).await
    }
}
