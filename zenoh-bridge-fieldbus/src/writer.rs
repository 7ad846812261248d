//! Output resolver and writer.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::codec::{self, EncodeError};
use crate::config::{FieldSpec, OutputGroup};
use crate::function::{ValueShape, WriteRequest, WriteValue};
use crate::registry::{BusHandle, BusRegistry};
use crate::state::{ModuleState, StateGate};
use crate::transport::{TransportError, WriteAck};

/// Failure of a labeled write.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("No output is labeled '{0}'")]
    NotFound(String),
    #[error("'{label}' expects a {expected} value, got a {actual}")]
    InvalidArgument {
        label: String,
        expected: ValueShape,
        actual: ValueShape,
    },
    #[error("Cannot encode value for '{label}': {source}")]
    Encode {
        label: String,
        #[source]
        source: EncodeError,
    },
    #[error("Module is busy ({0})")]
    Busy(ModuleState),
    #[error("Bus '{0}' is not connected")]
    NotConnected(String),
    #[error("Write to '{label}' failed: {source}")]
    Transport {
        label: String,
        #[source]
        source: TransportError,
    },
}

/// Where a labeled output lives.
#[derive(Clone, Copy)]
pub struct OutputTarget<'a> {
    pub bus: &'a Arc<BusHandle>,
    pub group: &'a OutputGroup,
    pub field: &'a FieldSpec,
}

/// Find the output group owning `label`, searching buses in declaration order.
pub fn resolve<'a>(registry: &'a BusRegistry, label: &str) -> Option<OutputTarget<'a>> {
    registry.buses().iter().find_map(|bus| {
        bus.outputs().iter().find_map(|group| {
            group
                .field_by_label(label)
                .filter(|field| !field.is_unused())
                .map(|field| OutputTarget { bus, group, field })
        })
    })
}

/// Check the value shape and encode it for the target's function code.
pub fn prepare(target: &OutputTarget<'_>, value: WriteValue) -> Result<WriteRequest, WriteError> {
    let function = target.group.function;
    let label = target.field.label.as_str();

    if value.shape() != function.shape() {
        return Err(WriteError::InvalidArgument {
            label: label.to_string(),
            expected: function.shape(),
            actual: value.shape(),
        });
    }

    let encode_error = |source| WriteError::Encode {
        label: label.to_string(),
        source,
    };
    let bytes = codec::encode(&target.group.layout, &value.into_values()).map_err(encode_error)?;
    codec::to_write_request(&bytes, function).map_err(encode_error)
}

/// Write `value` to the output labeled `label`.
///
/// Unknown labels and malformed values are rejected before the gate is
/// taken. After the request the bus and the gate stay held for the bus
/// `write_delay`.
pub async fn write(
    registry: &BusRegistry,
    gate: &StateGate,
    label: &str,
    value: WriteValue,
) -> Result<WriteAck, WriteError> {
    let target = resolve(registry, label).ok_or_else(|| {
        error!(label = %label, "No output configured for '{}'", label);
        WriteError::NotFound(label.to_string())
    })?;
    let request = prepare(&target, value)?;

    let _guard = gate
        .try_begin_write()
        .ok_or_else(|| WriteError::Busy(gate.state()))?;

    let bus = target.bus;
    let group = target.group;

    let mut link = bus.acquire().await;
    let Some(transport) = link.as_mut() else {
        error!(
            bus = %bus.name(),
            label = %label,
            "Cannot write '{}': bus '{}' is not connected",
            label,
            bus.name()
        );
        return Err(WriteError::NotConnected(bus.name().to_string()));
    };

    debug!(
        bus = %bus.name(),
        slave = group.slave_id,
        address = group.start_address,
        function = %group.function,
        fc = group.function.code(),
        "Writing {} to bus '{}' id {} add {} {}",
        request,
        bus.name(),
        group.slave_id,
        group.start_address,
        group.function
    );

    let result = transport
        .write(group.slave_id, group.start_address, &request)
        .await;

    if let Err(e) = &result {
        error!(
            bus = %bus.name(),
            label = %label,
            "Write to '{}' on bus '{}' failed: {}",
            label,
            bus.name(),
            e
        );
        bus.discard_on_failure(&mut link, e);
    }

    tokio::time::sleep(Duration::from_millis(bus.config().write_delay)).await;

    result.map_err(|source| WriteError::Transport {
        label: label.to_string(),
        source,
    })
}
