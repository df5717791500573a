use quarry_common::types::{AdvisoryKind, ProviderKind};

/// Normalized "document ready" events consumed by the ingestion pipeline.
pub const DOCUMENT_READY: &str = "document.ready";

/// Advisory subjects all share this prefix; the bus never dead-letters its
/// own advisories.
pub const ADVISORY_PREFIX: &str = "advisory.";

/// Trigger subject for one provider type.
pub fn sync_subject(kind: ProviderKind) -> String {
    format!("connector.sync.{kind}")
}

/// Stream name a subject belongs to: its first token.
pub fn stream_of(subject: &str) -> &str {
    subject.split('.').next().unwrap_or(subject)
}

pub fn advisory_subject(stream: &str, kind: AdvisoryKind) -> String {
    format!("advisory.{stream}.{}", kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_subject_is_per_kind() {
        assert_eq!(
            sync_subject(ProviderKind::GoogleCalendar),
            "connector.sync.google_calendar"
        );
    }

    #[test]
    fn stream_is_first_token() {
        assert_eq!(stream_of("connector.sync.gmail"), "connector");
        assert_eq!(stream_of("bare"), "bare");
    }

    #[test]
    fn advisory_subjects_derive_from_stream() {
        assert_eq!(
            advisory_subject("connector", AdvisoryKind::MaxDeliveries),
            "advisory.connector.max_deliveries"
        );
        assert_eq!(
            advisory_subject("connector", AdvisoryKind::Terminated),
            "advisory.connector.terminated"
        );
    }
}
