use alloy::{contract::Error as ContractError, transports::RpcError};

pub trait ContractErrorExt {
    /// Returns whether a given error is a node error. Node errors are the only
    /// ones worth retrying: a revert or a decoding failure stays the same no
    /// matter how often the call is repeated.
    fn is_node_error(&self) -> bool;
}

impl ContractErrorExt for ContractError {
    fn is_node_error(&self) -> bool {
        match self {
            // Some reverts are reported as error responses of the transport.
            // alloy's revert decoding gives up on empty revert data so the
            // presence of revert data is checked directly.
            ContractError::TransportError(RpcError::ErrorResp(err)) => {
                let no_revert_data = err.as_revert_data().is_none();
                tracing::debug!(?err, %no_revert_data, "transport rpc error");
                no_revert_data
            }
            ContractError::TransportError(_) => true,
            _ => false,
        }
    }
}

/// Create an arbitrary alloy error that will convert into a "contract" error.
/// Useful for testing.
#[cfg(any(test, feature = "test-util"))]
pub fn testing_alloy_contract_error() -> ContractError {
    ContractError::NotADeploymentTransaction
}

/// Create an arbitrary alloy error that will convert into a "node" error.
/// Useful for testing.
#[cfg(any(test, feature = "test-util"))]
pub fn testing_alloy_node_error() -> ContractError {
    ContractError::TransportError(alloy::transports::TransportError::ErrorResp(
        alloy::rpc::json_rpc::ErrorPayload::internal_error(),
    ))
}
