//! JSON wire encoding for [`DeferredDisaggregation`] messages.

use cif_types::DeferredDisaggregation;
use snafu::ResultExt;

use crate::error::EnvelopeSnafu;
use crate::Result;

pub fn encode(message: &DeferredDisaggregation) -> Result<Vec<u8>> {
    serde_json::to_vec(message).context(EnvelopeSnafu)
}

pub fn decode(payload: &[u8]) -> Result<DeferredDisaggregation> {
    serde_json::from_slice(payload).context(EnvelopeSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cif_time::Time;
    use cif_types::DisaggregationStatus;

    #[test]
    fn round_trips_through_json() {
        let message = DeferredDisaggregation {
            source_id: "s".into(),
            generation_id: 1,
            artifact_id: "a".into(),
            extractor_type: "HTMLExtractor".into(),
            fragment_id: None,
            start_byte: None,
            end_byte: None,
            created_on: Time::from_timestamp_micros(0),
            status: DisaggregationStatus::Pending,
            delivery_attempt: 1,
        };
        let payload = encode(&message).unwrap();
        assert_eq!(decode(&payload).unwrap(), message);
    }

    #[test]
    fn malformed_payload_is_an_envelope_error() {
        assert!(decode(b"not json").is_err());
    }
}
