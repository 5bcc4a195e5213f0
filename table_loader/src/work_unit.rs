//! Work units and their settlement.
//!
//! A [`WorkUnit`] can only be turned into a [`Settlement`] by consuming it, and
//! a settlement can only be handed to the queue by value, so every received
//! message is acked or nacked exactly once.
use std::fmt;

/// What the queue needs to acknowledge a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: String,
    /// Lease token, e.g. an SQS receipt handle. Empty where the transport
    /// settles by message id alone.
    pub handle: String,
}

/// One received message, from receipt until it is acked or nacked.
#[derive(Debug)]
pub struct WorkUnit {
    receipt: Receipt,
    body: String,
}

impl WorkUnit {
    pub fn new(message_id: impl Into<String>, handle: impl Into<String>, body: impl Into<String>) -> Self {
        WorkUnit {
            receipt: Receipt {
                message_id: message_id.into(),
                handle: handle.into(),
            },
            body: body.into(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.receipt.message_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub(crate) fn succeed(self) -> Settlement {
        self.settle(Decision::Ack, Outcome::Succeeded)
    }

    /// The failure was recorded on the dead-letter channel.
    pub(crate) fn dead_lettered(self) -> Settlement {
        self.settle(Decision::Ack, Outcome::FailedPoison)
    }

    /// The failure could not be recorded; hand the message back for redelivery.
    pub(crate) fn retry(self) -> Settlement {
        self.settle(Decision::Nack, Outcome::FailedRecoverable)
    }

    fn settle(self, decision: Decision, outcome: Outcome) -> Settlement {
        Settlement {
            receipt: self.receipt,
            decision,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ack,
    Nack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Failed and recorded on the dead-letter channel; acked.
    FailedPoison,
    /// Failed and not recorded anywhere; nacked for redelivery.
    FailedRecoverable,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::FailedPoison => "failed_poison",
            Outcome::FailedRecoverable => "failed_recoverable",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The final ack/nack decision for one work unit. Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct Settlement {
    receipt: Receipt,
    decision: Decision,
    outcome: Outcome,
}

impl Settlement {
    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn message_id(&self) -> &str {
        &self.receipt.message_id
    }

    pub fn is_ack(&self) -> bool {
        self.decision == Decision::Ack
    }

    pub fn into_receipt(self) -> Receipt {
        self.receipt
    }
}
