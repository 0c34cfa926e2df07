//! # Wire Protocol
//!
//! [`Envelope`] is every message shape that crosses a bridge transport. A
//! single internally-tagged enum keeps a malformed envelope a deserialization
//! error rather than a value the dispatcher has to validate by hand.
//!
//! `CallbackError` is an optional extension (see the pool's
//! `with_callback_errors` flag) that lets a callback failure surface to the
//! invoking side instead of leaking silently.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One call's request id. Minted by the call dispatcher on the side that
/// initiates a call (main-to-worker `Function`, or worker-to-main
/// `CallbackCall`); echoed back unchanged in the matching response.
pub type RequestId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Envelope {
    /// Invoke `procedure` with `args`, expecting exactly one eventual
    /// `Result` or `Error` echoing `id`.
    Function {
        id: RequestId,
        procedure: String,
        args: Vec<Value>,
    },
    /// Successful completion of the `Function` (or `CallbackCall`) that
    /// carried this `id`.
    Result { id: RequestId, value: Value },
    /// Failed completion of the `Function` (or `CallbackCall`) that carried
    /// this `id`. `message` is the stringified failure; the protocol never
    /// preserves structured error payloads across the boundary.
    Error { id: RequestId, message: String },
    /// Invoke the callback bound to `token` (minted when `token` was
    /// marshaled as a [`Value::Placeholder`] under `id`'s request). `call_id`
    /// is a freshly minted token scoping the matching
    /// `CallbackResult`/`CallbackError`, distinct from `id`'s request-id
    /// counter since it identifies a subcall rather than a top-level request.
    CallbackCall {
        id: RequestId,
        call_id: String,
        token: String,
        args: Vec<Value>,
    },
    /// Successful completion of the `CallbackCall` carrying this `call_id`.
    CallbackResult { call_id: String, value: Value },
    /// Failed completion of the `CallbackCall` carrying this `call_id`. Only
    /// emitted when the receiving pool was built with
    /// `WorkerPool::with_callback_errors`; otherwise a callback failure is
    /// logged and its `CallbackCall` never settles.
    CallbackError { call_id: String, message: String },
    /// Emitted once by a worker immediately after it installs its message
    /// handler, signaling it is ready to accept `Function` envelopes. The
    /// pool's slot-acquisition path blocks new calls on this per slot.
    Ready,
}

impl Envelope {
    /// The `id` a `Result`/`Error` echoes back to the top-level
    /// `pending_calls` table. `None` for every other variant.
    pub fn settles_request(&self) -> Option<RequestId> {
        match self {
            Envelope::Result { id, .. } => Some(*id),
            Envelope::Error { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// The `call_id` a `CallbackResult`/`CallbackError` echoes back to the
    /// `pending_callback_calls` table. `None` for every other variant.
    pub fn settles_call(&self) -> Option<&str> {
        match self {
            Envelope::CallbackResult { call_id, .. } => Some(call_id),
            Envelope::CallbackError { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settles_request_matches_result_and_error_to_their_request() {
        let result = Envelope::Result {
            id: 7,
            value: Value::Null,
        };
        assert_eq!(result.settles_request(), Some(7));

        let error = Envelope::Error {
            id: 8,
            message: "boom".to_string(),
        };
        assert_eq!(error.settles_request(), Some(8));
    }

    #[test]
    fn settles_call_matches_callback_result_to_its_call_id_not_its_request() {
        let cb_result = Envelope::CallbackResult {
            call_id: "3".to_string(),
            value: Value::Bool(true),
        };
        assert_eq!(cb_result.settles_call(), Some("3"));
        assert_eq!(cb_result.settles_request(), None);
    }

    #[test]
    fn originating_envelopes_settle_nothing() {
        let function = Envelope::Function {
            id: 1,
            procedure: "add".to_string(),
            args: vec![],
        };
        assert_eq!(function.settles_request(), None);
        assert_eq!(function.settles_call(), None);
        assert_eq!(Envelope::Ready.settles_request(), None);
        assert_eq!(Envelope::Ready.settles_call(), None);
    }

    #[test]
    fn envelope_round_trips_through_bincode() {
        let original = Envelope::Function {
            id: 42,
            procedure: "add".to_string(),
            args: vec![Value::Number(1.0), Value::Number(2.0)],
        };
        let bytes = bincode::serialize(&original).unwrap();
        let decoded: Envelope = bincode::deserialize(&bytes).unwrap();
        match decoded {
            Envelope::Function { id, procedure, args } => {
                assert_eq!(id, 42);
                assert_eq!(procedure, "add");
                assert_eq!(args, vec![Value::Number(1.0), Value::Number(2.0)]);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
