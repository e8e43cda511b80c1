use crate::error::RailError;

/// Normalizes a collaborator failure into the closed taxonomy.
///
/// A `RailError` anywhere at the top passes through unchanged. Transport
/// failures (`std::io::Error`, elapsed timers) anywhere in the chain become
/// `RailCommunication`. Everything else is wrapped as `RailOperationFailed`
/// with the original kept as its source.
pub fn map_error(err: anyhow::Error) -> RailError {
    let err = match err.downcast::<RailError>() {
        Ok(rail_error) => return rail_error,
        Err(err) => err,
    };

    let transport = err.chain().find(|cause| {
        cause.is::<std::io::Error>() || cause.is::<tokio::time::error::Elapsed>()
    });
    match transport {
        Some(cause) => RailError::RailCommunication(cause.to_string()),
        None => RailError::operation_failed(err),
    }
}
