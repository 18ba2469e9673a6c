#[cfg(test)]
mod tests {
    use carematch_common::models::{BookingStatus, PaymentStatus};
    use carematch_common::{CareMatchError, HttpStatusCode};
    use carematch_config::BookingConfig;
    use carematch_gcal::logic::calendar_event_id;
    use carematch_gcal::oauth::TokenGrant;
    use carematch_gcal::service::mock::MockCalendarOp;
    use carematch_gcal::StateSigner;
    use chrono::{TimeZone, Utc};

    use crate::logic::{ClientBookingRequest, TherapistScheduleRequest};
    use crate::test_support::{
        as_admin, as_client, as_therapist, harness, harness_with, local, request,
        DISCONNECTED_THERAPIST, GRANT_CLIENT, GRANT_ID, GROUP_CLIENT, GROUP_ID, NO_CARD_CLIENT,
        PLAIN_CLIENT, THERAPIST,
    };

    #[tokio::test]
    async fn test_group_credit_covers_session_with_synthetic_payment() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(GROUP_CLIENT), request(10))
            .await
            .unwrap();

        let booking = &outcome.booking;
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.group_subsidy_cents, 15000);
        assert_eq!(booking.out_of_pocket_cents, 0);
        assert_eq!(booking.sponsoring_group_id.as_deref(), Some(GROUP_ID));

        let payment = outcome.payment.unwrap();
        assert!(payment.is_synthetic());
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(h.payments.create_calls(), 0);

        let pool = h.ledger.find_group(GROUP_ID).await.unwrap().unwrap();
        assert_eq!(pool.remaining_credits, 2);
    }

    #[tokio::test]
    async fn test_direct_grant_reduces_held_charge() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(GRANT_CLIENT), request(10))
            .await
            .unwrap();

        assert_eq!(outcome.subsidy.direct_cents, 5000);
        assert_eq!(outcome.booking.out_of_pocket_cents, 10000);
        let payment = outcome.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.platform_fee_cents, 1500);

        let requests = h.payments.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount_cents, 10000);
        assert_eq!(requests[0].payer_reference, "cus_grant");
        assert_eq!(
            requests[0].idempotency_key,
            format!("booking-{}", outcome.booking.id)
        );

        let grant = h.ledger.find_direct_subsidy(GRANT_ID).await.unwrap().unwrap();
        assert_eq!(grant.remaining_cents, 0);
    }

    #[tokio::test]
    async fn test_booking_converts_times_and_attaches_calendar_event() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();

        let booking = &outcome.booking;
        // 10:00 in Chicago (CST) is 16:00 UTC
        assert_eq!(
            booking.session_start_time,
            Utc.with_ymd_and_hms(2026, 3, 2, 16, 0, 0).unwrap()
        );
        assert_eq!(booking.session_date.to_string(), "2026-03-02");
        assert_eq!(
            booking.metadata.client_time_zone.as_deref(),
            Some("America/Chicago")
        );
        assert_eq!(
            booking.metadata.therapist_time_zone.as_deref(),
            Some("America/New_York")
        );

        assert!(outcome.calendar_synced);
        let event_id = calendar_event_id(&booking.id);
        assert_eq!(booking.external_calendar_event_id.as_deref(), Some(event_id.as_str()));
        assert!(booking.metadata.meeting_link.is_some());
        assert!(h.calendar.event(&event_id).is_some());

        let stored = h.bookings.find_by_id(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.external_calendar_event_id, booking.external_calendar_event_id);
        assert_eq!(stored.metadata.meeting_link, booking.metadata.meeting_link);
    }

    #[tokio::test]
    async fn test_blank_time_zone_falls_back_to_client_profile() {
        let h = harness().await;
        let mut blank = request(10);
        blank.time_zone = Some("  ".into());
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), blank)
            .await
            .unwrap();

        assert_eq!(
            outcome.booking.session_start_time,
            Utc.with_ymd_and_hms(2026, 3, 2, 16, 0, 0).unwrap()
        );
        assert_eq!(
            outcome.booking.metadata.client_time_zone.as_deref(),
            Some("America/Chicago")
        );
    }

    #[tokio::test]
    async fn test_overlapping_booking_is_rejected_without_side_effects() {
        let h = harness().await;
        h.engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();

        let mut overlapping = request(10);
        overlapping.start_time = local(10, 30);
        overlapping.end_time = local(11, 30);
        let err = h
            .engine
            .book_as_client(&as_client(GRANT_CLIENT), overlapping)
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::SlotUnavailable(_)));
        assert_eq!(h.bookings.count().await.unwrap(), 1);
        assert_eq!(h.payments.create_calls(), 1);
        let grant = h.ledger.find_direct_subsidy(GRANT_ID).await.unwrap().unwrap();
        assert_eq!(grant.remaining_cents, 5000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_bookings_for_same_window_admit_one() {
        let h = harness().await;
        let plain = as_client(PLAIN_CLIENT);
        let grant = as_client(GRANT_CLIENT);

        let (first, second) = tokio::join!(
            h.engine.book_as_client(&plain, request(10)),
            h.engine.book_as_client(&grant, request(10)),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CareMatchError::SlotUnavailable(_)))));
        assert_eq!(h.bookings.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_sessions_are_accepted() {
        let h = harness().await;
        h.engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        h.engine
            .book_as_client(&as_client(GRANT_CLIENT), request(11))
            .await
            .unwrap();

        assert_eq!(h.bookings.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_external_busy_time_blocks_slot() {
        let h = harness().await;
        h.calendar.add_busy(
            Utc.with_ymd_and_hms(2026, 3, 2, 16, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 2, 17, 30, 0).unwrap(),
        );

        let err = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::SlotUnavailable(_)));
        assert_eq!(h.bookings.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_end_before_start_fails_before_any_call() {
        let h = harness().await;
        let mut backwards = request(10);
        backwards.end_time = local(9, 0);

        let err = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), backwards)
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::Validation(_)));
        assert!(h.calendar.tokens_seen().is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_calendar_is_auth_expired() {
        let h = harness().await;
        let mut req = request(10);
        req.therapist_id = DISCONNECTED_THERAPIST.into();

        let err = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), req)
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::AuthExpired { .. }));
        assert_eq!(err.status_code(), 424);
        assert_eq!(h.bookings.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_card_fails_booking_by_default() {
        let h = harness().await;
        let err = h
            .engine
            .book_as_client(&as_client(NO_CARD_CLIENT), request(10))
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::PaymentSetup(_)));
        assert_eq!(h.bookings.count().await.unwrap(), 0);
        assert_eq!(h.calendar.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_card_keeps_pending_booking_when_configured() {
        let h = harness_with(BookingConfig {
            persist_pending_on_payment_failure: true,
            ..Default::default()
        })
        .await;

        let outcome = h
            .engine
            .book_as_client(&as_client(NO_CARD_CLIENT), request(10))
            .await
            .unwrap();

        assert_eq!(outcome.booking.status, BookingStatus::Pending);
        assert!(outcome.payment.is_none());
        assert!(!outcome.calendar_synced);
        assert_eq!(h.calendar.create_calls(), 0);
        assert!(h
            .payments_repo
            .find_by_booking(&outcome.booking.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            h.notifier.templates_for("client-nocard@example.com"),
            vec!["booking_pending_payment".to_string()]
        );
    }

    #[tokio::test]
    async fn test_calendar_failure_keeps_booking_and_repair_creates_event() {
        let h = harness().await;
        h.calendar.fail_next(MockCalendarOp::Create, 503, "backend error");

        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        assert!(!outcome.calendar_synced);
        assert!(outcome.booking.external_calendar_event_id.is_none());
        assert!(outcome.payment.is_some());

        let report = h.engine.repair_calendar_sync(10).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.repaired, vec![outcome.booking.id.clone()]);
        assert!(report.failed.is_empty());

        let stored = h
            .bookings
            .find_by_id(&outcome.booking.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.external_calendar_event_id,
            Some(calendar_event_id(&outcome.booking.id))
        );
        assert_eq!(h.calendar.event_count(), 1);

        let second = h.engine.repair_calendar_sync(10).await.unwrap();
        assert_eq!(second.examined, 0);
    }

    #[tokio::test]
    async fn test_repair_reports_failures_per_booking() {
        let h = harness().await;
        h.calendar.fail_next(MockCalendarOp::Create, 503, "backend error");
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();

        h.calendar.fail_next(MockCalendarOp::Create, 503, "still down");
        let report = h.engine.repair_calendar_sync(10).await.unwrap();

        assert!(report.repaired.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].booking_id, outcome.booking.id);
        assert_eq!(report.failed[0].kind, "external_service_transient");
    }

    #[tokio::test]
    async fn test_cancel_removes_calendar_event_and_keeps_its_id() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        let event_id = calendar_event_id(&outcome.booking.id);

        let cancelled = h
            .engine
            .update_booking_status(
                &as_client(PLAIN_CLIENT),
                &outcome.booking.id,
                BookingStatus::Cancelled,
                Some("Feeling unwell".into()),
            )
            .await
            .unwrap();

        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Feeling unwell"));
        assert!(cancelled.external_calendar_event_id.is_none());
        assert_eq!(cancelled.metadata.previous_calendar_event_ids, vec![event_id.clone()]);
        assert!(cancelled.metadata.meeting_link.is_none());
        assert_eq!(h.calendar.delete_calls(), 1);
        assert!(h.calendar.event(&event_id).is_none());
        assert!(h
            .notifier
            .templates_for("ther-1@example.com")
            .contains(&"booking_cancelled".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_survives_calendar_delete_failure() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        h.calendar.fail_next(MockCalendarOp::Delete, 500, "backend error");

        let cancelled = h
            .engine
            .update_booking_status(&as_therapist(), &outcome.booking.id, BookingStatus::Cancelled, None)
            .await
            .unwrap();

        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(cancelled.external_calendar_event_id.is_none());
    }

    #[tokio::test]
    async fn test_repeating_status_is_noop_and_terminal_states_are_final() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        let id = outcome.booking.id.clone();
        let sent_before = h.notifier.sent().len();

        let same = h
            .engine
            .update_booking_status(&as_therapist(), &id, BookingStatus::Confirmed, None)
            .await
            .unwrap();
        assert_eq!(same.status, BookingStatus::Confirmed);
        assert_eq!(h.notifier.sent().len(), sent_before);

        h.engine
            .update_booking_status(&as_therapist(), &id, BookingStatus::Completed, None)
            .await
            .unwrap();
        let err = h
            .engine
            .update_booking_status(&as_therapist(), &id, BookingStatus::Cancelled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CareMatchError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_client_cannot_complete_or_touch_other_bookings() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        let id = outcome.booking.id.clone();

        let err = h
            .engine
            .update_booking_status(&as_client(PLAIN_CLIENT), &id, BookingStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CareMatchError::Forbidden(_)));

        let err = h
            .engine
            .get_booking(&as_client(GRANT_CLIENT), &id)
            .await
            .unwrap_err();
        assert!(matches!(err, CareMatchError::Forbidden(_)));

        assert!(h.engine.get_booking(&as_admin(), &id).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_cannot_book_for_someone_else() {
        let h = harness().await;
        let mut req = request(10);
        req.client_id = Some(GRANT_CLIENT.into());

        let err = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), req)
            .await
            .unwrap_err();
        assert!(matches!(err, CareMatchError::Forbidden(_)));

        let mut req = request(10);
        req.client_id = Some(GRANT_CLIENT.into());
        let outcome = h.engine.book_as_client(&as_admin(), req).await.unwrap();
        assert_eq!(outcome.booking.client_id, GRANT_CLIENT);
        assert_eq!(outcome.booking.metadata.initiated_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_therapist_schedules_in_their_own_time_zone() {
        let h = harness().await;
        let outcome = h
            .engine
            .schedule_as_therapist(
                &as_therapist(),
                TherapistScheduleRequest {
                    client_id: PLAIN_CLIENT.into(),
                    start_time: local(11, 0),
                    end_time: local(12, 0),
                    time_zone: None,
                    notes: Some("Intake".into()),
                    therapist_id: None,
                },
            )
            .await
            .unwrap();

        // Profile zone America/New_York: 11:00 EST is 16:00 UTC
        assert_eq!(
            outcome.booking.session_start_time,
            Utc.with_ymd_and_hms(2026, 3, 2, 16, 0, 0).unwrap()
        );
        assert_eq!(outcome.booking.therapist_id, THERAPIST);
        assert_eq!(outcome.booking.metadata.initiated_by.as_deref(), Some("therapist"));
        assert_eq!(outcome.booking.metadata.notes.as_deref(), Some("Intake"));
    }

    #[tokio::test]
    async fn test_client_cannot_use_therapist_entry_point() {
        let h = harness().await;
        let err = h
            .engine
            .schedule_as_therapist(
                &as_client(PLAIN_CLIENT),
                TherapistScheduleRequest {
                    client_id: PLAIN_CLIENT.into(),
                    start_time: local(11, 0),
                    end_time: local(12, 0),
                    time_zone: None,
                    notes: None,
                    therapist_id: Some(THERAPIST.into()),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_capture_is_idempotent() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(GRANT_CLIENT), request(10))
            .await
            .unwrap();
        let id = outcome.booking.id.clone();

        let first = h.engine.capture_payment(&as_therapist(), &id).await.unwrap();
        let second = h.engine.capture_payment(&as_therapist(), &id).await.unwrap();

        assert_eq!(first.status, PaymentStatus::Succeeded);
        assert!(first.charged_at.is_some());
        assert_eq!(second.status, PaymentStatus::Succeeded);
        assert_eq!(h.payments.capture_calls(), 1);
        let reference = outcome.payment.unwrap().external_payment_reference;
        assert_eq!(h.payments.intent(&reference).unwrap().status, "succeeded");
    }

    #[tokio::test]
    async fn test_clients_cannot_capture() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(GRANT_CLIENT), request(10))
            .await
            .unwrap();

        let err = h
            .engine
            .capture_payment(&as_client(GRANT_CLIENT), &outcome.booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CareMatchError::Forbidden(_)));
        assert_eq!(h.payments.capture_calls(), 0);
    }

    #[tokio::test]
    async fn test_release_after_cancel_and_no_capture_afterwards() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        let id = outcome.booking.id.clone();

        h.engine
            .update_booking_status(&as_client(PLAIN_CLIENT), &id, BookingStatus::Cancelled, None)
            .await
            .unwrap();
        // Status changes never move money
        assert_eq!(h.payments.cancel_calls(), 0);

        let released = h.engine.release_payment(&as_therapist(), &id).await.unwrap();
        assert_eq!(released.status, PaymentStatus::Failed);
        assert_eq!(h.payments.cancel_calls(), 1);

        let again = h.engine.release_payment(&as_therapist(), &id).await.unwrap();
        assert_eq!(again.status, PaymentStatus::Failed);
        assert_eq!(h.payments.cancel_calls(), 1);

        let err = h.engine.capture_payment(&as_therapist(), &id).await.unwrap_err();
        assert!(matches!(err, CareMatchError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_release_of_completed_session_is_rejected() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();
        let id = outcome.booking.id.clone();
        h.engine
            .update_booking_status(&as_therapist(), &id, BookingStatus::Completed, None)
            .await
            .unwrap();

        let err = h.engine.release_payment(&as_therapist(), &id).await.unwrap_err();
        assert!(matches!(err, CareMatchError::InvalidTransition { .. }));
        assert_eq!(h.payments.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn test_settlement_view_matches_allocations() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(GRANT_CLIENT), request(10))
            .await
            .unwrap();

        let view = h
            .engine
            .verify_settlement(&as_client(GRANT_CLIENT), &outcome.booking.id)
            .await
            .unwrap();

        assert_eq!(view.allocated_cents, 5000);
        let payment = view.payment.unwrap();
        assert_eq!(
            payment.subsidy_used_cents + payment.out_of_pocket_cents,
            payment.total_amount_cents
        );
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_booking() {
        let h = harness().await;
        h.notifier.fail_all();

        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();

        assert_eq!(outcome.booking.status, BookingStatus::Confirmed);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(h.bookings.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_both_parties_are_notified_of_confirmation() {
        let h = harness().await;
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), request(10))
            .await
            .unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|n| n.template == "booking_confirmed"));
        assert_eq!(sent[0].to, "client-plain@example.com");
        assert_eq!(sent[1].to, "ther-1@example.com");
        assert_eq!(sent[0].data["booking_id"], outcome.booking.id.as_str());
        assert!(sent[0].data["meeting_link"].is_string());
    }

    #[tokio::test]
    async fn test_quote_consumes_nothing() {
        let h = harness().await;
        let quote = h.engine.quote_booking(GROUP_CLIENT, THERAPIST).await.unwrap();

        assert_eq!(quote.session_rate_cents, 15000);
        assert_eq!(quote.subsidy.group_cents, 15000);
        assert_eq!(quote.subsidy.out_of_pocket_cents, 0);
        let pool = h.ledger.find_group(GROUP_ID).await.unwrap().unwrap();
        assert_eq!(pool.remaining_credits, 3);
        assert_eq!(h.bookings.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_therapist_is_not_found() {
        let h = harness().await;
        let err = h
            .engine
            .book_as_client(
                &as_client(PLAIN_CLIENT),
                ClientBookingRequest {
                    therapist_id: "ther-404".into(),
                    ..request(10)
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_connecting_calendar_enables_booking() {
        let h = harness().await;
        let url = h
            .engine
            .calendar_authorization_url(DISCONNECTED_THERAPIST)
            .await
            .unwrap();
        assert!(url.contains("state="));

        h.endpoint.set_exchange_grant(TokenGrant {
            access_token: "access-new".into(),
            refresh_token: Some("refresh-new".into()),
            expires_in: Some(3600),
            scope: None,
        });
        let state = StateSigner::new("state-secret")
            .sign(DISCONNECTED_THERAPIST, Utc::now())
            .unwrap();
        let connected = h
            .engine
            .complete_calendar_authorization("code-1", &state)
            .await
            .unwrap();
        assert_eq!(connected, DISCONNECTED_THERAPIST);

        let mut req = request(10);
        req.therapist_id = DISCONNECTED_THERAPIST.into();
        let outcome = h
            .engine
            .book_as_client(&as_client(PLAIN_CLIENT), req)
            .await
            .unwrap();
        assert!(outcome.calendar_synced);
    }

    #[tokio::test]
    async fn test_tampered_oauth_state_is_forbidden() {
        let h = harness().await;
        let state = StateSigner::new("other-secret")
            .sign(DISCONNECTED_THERAPIST, Utc::now())
            .unwrap();

        let err = h
            .engine
            .complete_calendar_authorization("code-1", &state)
            .await
            .unwrap_err();

        assert!(matches!(err, CareMatchError::Forbidden(_)));
    }
}
