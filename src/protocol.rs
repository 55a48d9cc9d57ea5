use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// UUID of the characteristic that reports device state.
pub(crate) const READ_STATE_UUID: &str = "80c37f00-cc16-11e4-8830-0800200c9a66";

/// UUID of the characteristic that accepts command frames.
pub(crate) const WRITE_STATE_UUID: &str = "90759319-1668-44da-9ef3-492d593bd1e5";

/// Length of the pairing token carried by advertisements and auth frames.
pub(crate) const PAIRING_TOKEN_LEN: usize = 8;

/// Known SNOOZ GATT endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// Characteristic used for state reads and notifications.
    #[strum(to_string = "read_state_characteristic")]
    ReadStateCharacteristic,
    /// Characteristic used for command writes.
    #[strum(to_string = "write_state_characteristic")]
    WriteStateCharacteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: &'static str,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }
}

/// Endpoint metadata keyed by typed endpoint IDs.
pub(crate) static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> =
    LazyLock::new(|| {
        EndpointId::iter()
            .map(|endpoint| (endpoint, metadata_for(endpoint)))
            .collect()
    });

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Resolves an endpoint from a characteristic UUID, ignoring case.
pub(crate) fn endpoint_for_uuid(uuid: &str) -> Option<EndpointId> {
    EndpointId::iter().find(|endpoint| endpoint_metadata(*endpoint).uuid().eq_ignore_ascii_case(uuid))
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::ReadStateCharacteristic => EndpointMetadata {
            name: "SNOOZ read state",
            uuid: READ_STATE_UUID,
        },
        EndpointId::WriteStateCharacteristic => EndpointMetadata {
            name: "SNOOZ write state",
            uuid: WRITE_STATE_UUID,
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn endpoint_metadata_contains_expected_names() {
        let read = endpoint_metadata(EndpointId::ReadStateCharacteristic);
        assert_eq!("SNOOZ read state", read.name());

        let write = endpoint_metadata(EndpointId::WriteStateCharacteristic);
        assert_eq!("SNOOZ write state", write.name());
    }

    #[rstest]
    #[case(READ_STATE_UUID, Some(EndpointId::ReadStateCharacteristic))]
    #[case("90759319-1668-44DA-9EF3-492D593BD1E5", Some(EndpointId::WriteStateCharacteristic))]
    #[case("0000fa02-0000-1000-8000-00805f9b34fb", None)]
    fn endpoint_for_uuid_ignores_case(#[case] uuid: &str, #[case] expected: Option<EndpointId>) {
        assert_eq!(expected, endpoint_for_uuid(uuid));
    }
}
