use crate::gmail::GmailProvider;
use crate::google_calendar::GoogleCalendarProvider;
use crate::google_contacts::GoogleContactsProvider;
use crate::google_drive::GoogleDriveProvider;
use crate::onedrive::OnedriveProvider;
use crate::provider::Provider;
use quarry_common::types::ProviderKind;

/// Instantiate the adapter for a connector kind string, or None if the
/// kind is unknown.
pub fn create(kind: &str) -> Option<Box<dyn Provider>> {
    let kind: ProviderKind = kind.parse().ok()?;
    Some(match kind {
        ProviderKind::GoogleDrive => Box::new(GoogleDriveProvider::new()),
        ProviderKind::GoogleCalendar => Box::new(GoogleCalendarProvider::new()),
        ProviderKind::GoogleContacts => Box::new(GoogleContactsProvider::new()),
        ProviderKind::Gmail => Box::new(GmailProvider::new()),
        ProviderKind::Onedrive => Box::new(OnedriveProvider::new()),
    })
}
