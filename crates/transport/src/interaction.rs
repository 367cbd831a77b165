//! Interaction types and their stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The six interaction patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionType {
    /// One-way message, no reply.
    Send,
    /// Message answered by a single acknowledgement.
    Submit,
    /// Message answered by a single response.
    Request,
    /// Message answered by an acknowledgement then a response.
    Invoke,
    /// Message answered by an acknowledgement, any number of updates, then a response.
    Progress,
    /// Publish/subscribe family of stages.
    PubSub,
}

impl InteractionType {
    /// Wire number of the interaction type.
    pub const fn wire_number(self) -> u8 {
        match self {
            Self::Send => 1,
            Self::Submit => 2,
            Self::Request => 3,
            Self::Invoke => 4,
            Self::Progress => 5,
            Self::PubSub => 6,
        }
    }

    /// Decodes a wire number, `None` if unrecognised.
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Send),
            2 => Some(Self::Submit),
            3 => Some(Self::Request),
            4 => Some(Self::Invoke),
            5 => Some(Self::Progress),
            6 => Some(Self::PubSub),
            _ => None,
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Send => "SEND",
            Self::Submit => "SUBMIT",
            Self::Request => "REQUEST",
            Self::Invoke => "INVOKE",
            Self::Progress => "PROGRESS",
            Self::PubSub => "PUBSUB",
        };
        f.write_str(name)
    }
}

/// A named step within an interaction pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum InteractionStage {
    Send,
    Submit,
    SubmitAck,
    Request,
    RequestResponse,
    Invoke,
    InvokeAck,
    InvokeResponse,
    Progress,
    ProgressAck,
    ProgressUpdate,
    ProgressResponse,
    Register,
    RegisterAck,
    PublishRegister,
    PublishRegisterAck,
    Publish,
    Notify,
    Deregister,
    DeregisterAck,
    PublishDeregister,
    PublishDeregisterAck,
}

impl InteractionStage {
    /// The interaction type this stage belongs to.
    pub const fn interaction_type(self) -> InteractionType {
        match self {
            Self::Send => InteractionType::Send,
            Self::Submit | Self::SubmitAck => InteractionType::Submit,
            Self::Request | Self::RequestResponse => InteractionType::Request,
            Self::Invoke | Self::InvokeAck | Self::InvokeResponse => InteractionType::Invoke,
            Self::Progress
            | Self::ProgressAck
            | Self::ProgressUpdate
            | Self::ProgressResponse => InteractionType::Progress,
            Self::Register
            | Self::RegisterAck
            | Self::PublishRegister
            | Self::PublishRegisterAck
            | Self::Publish
            | Self::Notify
            | Self::Deregister
            | Self::DeregisterAck
            | Self::PublishDeregister
            | Self::PublishDeregisterAck => InteractionType::PubSub,
        }
    }

    /// Wire number of the stage within its interaction type.
    pub const fn wire_number(self) -> u8 {
        match self {
            Self::Send | Self::Submit | Self::Request | Self::Invoke | Self::Progress => 1,
            Self::Register => 1,
            Self::SubmitAck | Self::RequestResponse | Self::InvokeAck | Self::ProgressAck => 2,
            Self::RegisterAck => 2,
            Self::InvokeResponse | Self::ProgressUpdate | Self::PublishRegister => 3,
            Self::ProgressResponse | Self::PublishRegisterAck => 4,
            Self::Publish => 5,
            Self::Notify => 6,
            Self::Deregister => 7,
            Self::DeregisterAck => 8,
            Self::PublishDeregister => 9,
            Self::PublishDeregisterAck => 10,
        }
    }

    /// Decodes a (type, stage number) pair, `None` if the stage does not exist
    /// for that type.
    pub const fn from_wire(interaction_type: InteractionType, value: u8) -> Option<Self> {
        let stage = match (interaction_type, value) {
            (InteractionType::Send, 1) => Self::Send,
            (InteractionType::Submit, 1) => Self::Submit,
            (InteractionType::Submit, 2) => Self::SubmitAck,
            (InteractionType::Request, 1) => Self::Request,
            (InteractionType::Request, 2) => Self::RequestResponse,
            (InteractionType::Invoke, 1) => Self::Invoke,
            (InteractionType::Invoke, 2) => Self::InvokeAck,
            (InteractionType::Invoke, 3) => Self::InvokeResponse,
            (InteractionType::Progress, 1) => Self::Progress,
            (InteractionType::Progress, 2) => Self::ProgressAck,
            (InteractionType::Progress, 3) => Self::ProgressUpdate,
            (InteractionType::Progress, 4) => Self::ProgressResponse,
            (InteractionType::PubSub, 1) => Self::Register,
            (InteractionType::PubSub, 2) => Self::RegisterAck,
            (InteractionType::PubSub, 3) => Self::PublishRegister,
            (InteractionType::PubSub, 4) => Self::PublishRegisterAck,
            (InteractionType::PubSub, 5) => Self::Publish,
            (InteractionType::PubSub, 6) => Self::Notify,
            (InteractionType::PubSub, 7) => Self::Deregister,
            (InteractionType::PubSub, 8) => Self::DeregisterAck,
            (InteractionType::PubSub, 9) => Self::PublishDeregister,
            (InteractionType::PubSub, 10) => Self::PublishDeregisterAck,
            _ => return None,
        };
        Some(stage)
    }
}

impl fmt::Display for InteractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Send => "SEND",
            Self::Submit => "SUBMIT",
            Self::SubmitAck => "SUBMIT_ACK",
            Self::Request => "REQUEST",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::Invoke => "INVOKE",
            Self::InvokeAck => "INVOKE_ACK",
            Self::InvokeResponse => "INVOKE_RESPONSE",
            Self::Progress => "PROGRESS",
            Self::ProgressAck => "PROGRESS_ACK",
            Self::ProgressUpdate => "PROGRESS_UPDATE",
            Self::ProgressResponse => "PROGRESS_RESPONSE",
            Self::Register => "REGISTER",
            Self::RegisterAck => "REGISTER_ACK",
            Self::PublishRegister => "PUBLISH_REGISTER",
            Self::PublishRegisterAck => "PUBLISH_REGISTER_ACK",
            Self::Publish => "PUBLISH",
            Self::Notify => "NOTIFY",
            Self::Deregister => "DEREGISTER",
            Self::DeregisterAck => "DEREGISTER_ACK",
            Self::PublishDeregister => "PUBLISH_DEREGISTER",
            Self::PublishDeregisterAck => "PUBLISH_DEREGISTER_ACK",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STAGES: [InteractionStage; 22] = [
        InteractionStage::Send,
        InteractionStage::Submit,
        InteractionStage::SubmitAck,
        InteractionStage::Request,
        InteractionStage::RequestResponse,
        InteractionStage::Invoke,
        InteractionStage::InvokeAck,
        InteractionStage::InvokeResponse,
        InteractionStage::Progress,
        InteractionStage::ProgressAck,
        InteractionStage::ProgressUpdate,
        InteractionStage::ProgressResponse,
        InteractionStage::Register,
        InteractionStage::RegisterAck,
        InteractionStage::PublishRegister,
        InteractionStage::PublishRegisterAck,
        InteractionStage::Publish,
        InteractionStage::Notify,
        InteractionStage::Deregister,
        InteractionStage::DeregisterAck,
        InteractionStage::PublishDeregister,
        InteractionStage::PublishDeregisterAck,
    ];

    #[test]
    fn test_wire_numbers_are_unique_per_type() {
        for stage in ALL_STAGES {
            let decoded = InteractionStage::from_wire(stage.interaction_type(), stage.wire_number());
            assert_eq!(decoded, Some(stage));
        }
    }

    #[test]
    fn test_unknown_wire_values() {
        assert_eq!(InteractionType::from_wire(0), None);
        assert_eq!(InteractionType::from_wire(7), None);
        assert_eq!(InteractionStage::from_wire(InteractionType::Send, 2), None);
        assert_eq!(InteractionStage::from_wire(InteractionType::PubSub, 11), None);
    }
}
