//! WhatsApp message bodies and phone normalization.

/// Convert a raw phone number to `whatsapp:+<country><number>` form.
///
/// Numbers already carrying a `whatsapp:` or `+` prefix pass through;
/// bare 12-digit numbers starting with 91 get a `+`; anything else is
/// assumed to be a local Indian number.
pub fn normalize_phone(phone: &str) -> String {
    let phone: String = phone
        .trim()
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect();

    if phone.starts_with("whatsapp:") {
        return phone;
    }
    if phone.starts_with('+') {
        return format!("whatsapp:{phone}");
    }
    if phone.len() == 12 && phone.starts_with("91") {
        return format!("whatsapp:+{phone}");
    }
    format!("whatsapp:+91{phone}")
}

/// Match confidence as a whole percentage, clamped at 0.
///
/// Cosine distance can exceed 1 for opposed vectors; the percentage
/// never goes negative.
pub fn confidence_pct(distance: f32) -> i64 {
    (((1.0 - distance as f64) * 100.0).round() as i64).max(0)
}

/// Body of the alert sent to a complainant when their case matches a scan.
pub fn match_alert_body(
    missing_name: &str,
    distance: f32,
    location: &str,
    officer_contact: &str,
) -> String {
    format!(
        "🚨 *Missing Person Found*\n\n\
         Your dear one (*{missing_name}*) is here!\n\n\
         📍 Location: *{location}*\n\
         📊 Match confidence: *{pct}%*\n\
         📞 Kindly call the officer at: *{officer_contact}* for more information.\n\n\
         — Missing Person Support System",
        pct = confidence_pct(distance),
    )
}

/// Confirmation sent to the complainant right after a report is filed.
pub fn report_confirmation_body(
    complainant_name: &str,
    missing_name: &str,
    case_id: i64,
) -> String {
    format!(
        "✅ *Report Registered*\n\n\
         Dear *{complainant_name}*,\n\n\
         Your missing person report for *{missing_name}* has been registered successfully.\n\n\
         📋 Case ID: *#{case_id}*\n\n\
         You will receive a WhatsApp alert if our system identifies a match.\n\n\
         — Missing Person Support System"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_variants() {
        assert_eq!(normalize_phone("9876543210"), "whatsapp:+919876543210");
        assert_eq!(normalize_phone("919876543210"), "whatsapp:+919876543210");
        assert_eq!(normalize_phone("+449876543210"), "whatsapp:+449876543210");
        assert_eq!(
            normalize_phone("whatsapp:+919876543210"),
            "whatsapp:+919876543210"
        );
        assert_eq!(normalize_phone(" 98765 432-10 "), "whatsapp:+919876543210");
    }

    #[test]
    fn test_confidence_pct() {
        assert_eq!(confidence_pct(0.0), 100);
        assert_eq!(confidence_pct(0.25), 75);
        assert_eq!(confidence_pct(0.254), 75);
        assert_eq!(confidence_pct(1.0), 0);
        // Opposed vectors give distance > 1; clamp instead of going negative.
        assert_eq!(confidence_pct(1.8), 0);
    }

    #[test]
    fn test_match_alert_body_contents() {
        let body = match_alert_body("Devika R", 0.2, "Main Terminal - Gate 4", "+91 8589958840");
        assert!(body.contains("Devika R"));
        assert!(body.contains("80%"));
        assert!(body.contains("Main Terminal - Gate 4"));
        assert!(body.contains("+91 8589958840"));
    }

    #[test]
    fn test_report_confirmation_body_contents() {
        let body = report_confirmation_body("Meera", "Devika R", 42);
        assert!(body.contains("Meera"));
        assert!(body.contains("Devika R"));
        assert!(body.contains("#42"));
    }
}
