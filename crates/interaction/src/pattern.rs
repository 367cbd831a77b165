//! Stage sequencing shared by the consumer and provider sides.
//!
//! Every pattern is described by one table of legal `(last, next)` stage
//! pairs. Consumers check received stages against it, providers check the
//! stages they are about to send.

use mal_transport::InteractionStage;

/// Outcome of a legal stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// More stages follow.
    Continue,
    /// The interaction is complete.
    Finish,
}

/// Looks up the `(last, next)` pair in the stage table.
///
/// Returns `None` when `next` may not follow `last`.
pub const fn transition(last: InteractionStage, next: InteractionStage) -> Option<Transition> {
    use InteractionStage::*;

    match (last, next) {
        (Invoke, InvokeAck)
        | (Progress, ProgressAck)
        | (ProgressAck | ProgressUpdate, ProgressUpdate) => Some(Transition::Continue),
        (Submit, SubmitAck)
        | (Request, RequestResponse)
        | (InvokeAck, InvokeResponse)
        | (ProgressAck | ProgressUpdate, ProgressResponse)
        | (Register, RegisterAck)
        | (PublishRegister, PublishRegisterAck)
        | (Deregister, DeregisterAck)
        | (PublishDeregister, PublishDeregisterAck) => Some(Transition::Finish),
        _ => None,
    }
}

/// Whether a stage opens a new interaction at the receiving side.
pub const fn is_initiating(stage: InteractionStage) -> bool {
    use InteractionStage::*;

    matches!(
        stage,
        Send | Submit
            | Request
            | Invoke
            | Progress
            | Register
            | PublishRegister
            | Publish
            | Deregister
            | PublishDeregister
    )
}

/// The stage an error answering an inbound `stage` is sent with.
///
/// `None` when the inbound message has no return channel: one-way sends,
/// notifications, and every reply stage. Errors are never bounced for
/// errors or replies.
pub const fn return_stage(stage: InteractionStage) -> Option<InteractionStage> {
    use InteractionStage::*;

    match stage {
        Submit => Some(SubmitAck),
        Request => Some(RequestResponse),
        Invoke => Some(InvokeAck),
        Progress => Some(ProgressAck),
        Register => Some(RegisterAck),
        PublishRegister => Some(PublishRegisterAck),
        Publish => Some(Publish),
        Deregister => Some(DeregisterAck),
        PublishDeregister => Some(PublishDeregisterAck),
        _ => None,
    }
}

/// The stage an error is carried with once `last` has been exchanged.
///
/// Before the first reply this is the return stage; afterwards it is the
/// terminal stage of the pattern.
pub const fn error_stage(last: InteractionStage) -> Option<InteractionStage> {
    use InteractionStage::*;

    match last {
        InvokeAck => Some(InvokeResponse),
        ProgressAck | ProgressUpdate => Some(ProgressResponse),
        other => return_stage(other),
    }
}

/// The first reply to an initiating stage, the one synchronous callers wait
/// for.
pub const fn first_reply(stage: InteractionStage) -> Option<InteractionStage> {
    match stage {
        InteractionStage::Publish => None,
        other => return_stage(other),
    }
}

/// The acknowledgement stage for an inbound initiating stage.
pub const fn acknowledgement_stage(stage: InteractionStage) -> Option<InteractionStage> {
    use InteractionStage::*;

    match stage {
        Submit => Some(SubmitAck),
        Invoke => Some(InvokeAck),
        Progress => Some(ProgressAck),
        Register => Some(RegisterAck),
        PublishRegister => Some(PublishRegisterAck),
        Deregister => Some(DeregisterAck),
        PublishDeregister => Some(PublishDeregisterAck),
        _ => None,
    }
}

/// The response stage for an interaction whose initiating stage is `stage`.
pub const fn response_stage(stage: InteractionStage) -> Option<InteractionStage> {
    use InteractionStage::*;

    match stage {
        Request => Some(RequestResponse),
        Invoke => Some(InvokeResponse),
        Progress => Some(ProgressResponse),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InteractionStage::*;

    /// Walks a sequence of stages, returning the outcome of the last step.
    fn walk(stages: &[InteractionStage]) -> Option<Transition> {
        let mut outcome = None;
        for pair in stages.windows(2) {
            outcome = Some(transition(pair[0], pair[1])?);
        }
        outcome
    }

    #[test]
    fn test_legal_sequences_finish() {
        assert_eq!(walk(&[Submit, SubmitAck]), Some(Transition::Finish));
        assert_eq!(walk(&[Request, RequestResponse]), Some(Transition::Finish));
        assert_eq!(
            walk(&[Invoke, InvokeAck, InvokeResponse]),
            Some(Transition::Finish)
        );
        assert_eq!(
            walk(&[
                Progress,
                ProgressAck,
                ProgressUpdate,
                ProgressUpdate,
                ProgressResponse
            ]),
            Some(Transition::Finish)
        );
        assert_eq!(walk(&[Progress, ProgressAck, ProgressResponse]), Some(Transition::Finish));
        assert_eq!(walk(&[Register, RegisterAck]), Some(Transition::Finish));
        assert_eq!(
            walk(&[PublishDeregister, PublishDeregisterAck]),
            Some(Transition::Finish)
        );
    }

    #[test]
    fn test_out_of_order_stages_rejected() {
        assert_eq!(transition(Invoke, InvokeResponse), None);
        assert_eq!(transition(Progress, ProgressUpdate), None);
        assert_eq!(transition(Progress, ProgressResponse), None);
        assert_eq!(transition(SubmitAck, SubmitAck), None);
        assert_eq!(transition(InvokeResponse, InvokeResponse), None);
        assert_eq!(transition(Register, DeregisterAck), None);
        assert_eq!(transition(Request, SubmitAck), None);
        assert_eq!(transition(Send, Send), None);
    }

    #[test]
    fn test_no_error_bounced_for_replies() {
        for stage in [SubmitAck, RequestResponse, InvokeAck, ProgressUpdate, Notify, Send] {
            assert_eq!(return_stage(stage), None, "{stage}");
        }
        assert_eq!(return_stage(Publish), Some(Publish));
        assert_eq!(first_reply(Publish), None);
    }

    #[test]
    fn test_error_stage_follows_progress() {
        assert_eq!(error_stage(Invoke), Some(InvokeAck));
        assert_eq!(error_stage(InvokeAck), Some(InvokeResponse));
        assert_eq!(error_stage(ProgressUpdate), Some(ProgressResponse));
        assert_eq!(error_stage(InvokeResponse), None);
    }
}
