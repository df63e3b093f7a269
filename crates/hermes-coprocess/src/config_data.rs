//! Per-API config data injection.

use crate::envelope::Envelope;
use hermes_core::Metadata;

/// Attaches the API's config data to `envelope` under `spec.config_data`.
///
/// When `disabled`, hooks see an empty map. The source mapping is only ever
/// copied.
#[must_use]
pub fn inject(mut envelope: Envelope, config_data: &Metadata, disabled: bool) -> Envelope {
    envelope.spec.config_data = if disabled {
        Metadata::new()
    } else {
        config_data.clone()
    };
    envelope
}
