#[cfg(test)]
mod tests {
    use crate::error::StripeError;
    use crate::logic::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_767_225_600;

    fn header_for(payload: &str, timestamp: i64) -> String {
        let sig = compute_signature(SECRET, &timestamp.to_string(), payload.as_bytes()).unwrap();
        format!("t={},v1={}", timestamp, sig)
    }

    #[test]
    fn test_platform_fee_is_on_total_and_capped() {
        // 10 % of a $150 session, half of it paid out of pocket
        assert_eq!(platform_fee_cents(15000, 10, 7500), 1500);
        // Fee never exceeds what is actually charged
        assert_eq!(platform_fee_cents(15000, 10, 1000), 1000);
        assert_eq!(platform_fee_cents(15000, 0, 15000), 0);
        assert_eq!(platform_fee_cents(15000, 150, 15000), 15000);
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let payload = r#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = header_for(payload, NOW);
        assert!(verify_stripe_signature_at(payload.as_bytes(), Some(&header), SECRET, NOW).is_ok());
    }

    #[test]
    fn test_any_matching_v1_signature_is_enough() {
        let payload = "{}";
        let good = header_for(payload, NOW);
        let header = format!("t={},v1=deadbeef,{}", NOW, good.split_once(',').unwrap().1);
        assert!(verify_stripe_signature_at(payload.as_bytes(), Some(&header), SECRET, NOW).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let header = header_for(r#"{"amount":100}"#, NOW);
        let err =
            verify_stripe_signature_at(br#"{"amount":999}"#, Some(&header), SECRET, NOW).unwrap_err();
        assert!(matches!(err, StripeError::WebhookSignatureError(ref m) if m == "Signature mismatch"));
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let payload = "{}";
        let header = header_for(payload, NOW - SIGNATURE_TOLERANCE_SECS - 1);
        assert!(verify_stripe_signature_at(payload.as_bytes(), Some(&header), SECRET, NOW).is_err());
    }

    #[test]
    fn test_malformed_headers_are_rejected() {
        for header in [None, Some("v1=abc"), Some("t=abc,v1=abc"), Some(&*format!("t={}", NOW))] {
            let err = verify_stripe_signature_at(b"{}", header, SECRET, NOW).unwrap_err();
            assert!(matches!(err, StripeError::WebhookSignatureError(_)));
        }
    }

    #[test]
    fn test_payment_event_parsing() {
        let event: StripeEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "object": "event",
            "created": NOW,
            "livemode": false,
            "type": "payment_intent.canceled",
            "data": { "object": { "id": "pi_1", "status": "canceled", "amount": 5000,
                                  "metadata": { "booking_id": "b-1" } } }
        }))
        .unwrap();
        assert_eq!(event.payment_event_kind(), Some(PaymentEventKind::Canceled));
        let intent = event.payment_intent().unwrap();
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.metadata.get("booking_id").map(String::as_str), Some("b-1"));

        let other: StripeEvent = serde_json::from_value(json!({
            "id": "evt_2",
            "type": "customer.created",
            "data": { "object": {} }
        }))
        .unwrap();
        assert_eq!(other.payment_event_kind(), None);
        assert!(other.payment_intent().is_err());
    }
}
