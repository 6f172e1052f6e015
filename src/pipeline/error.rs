use thiserror::Error;

/// The only failures that end one workstation's poll. Everything else in
/// the pipeline degrades in place: malformed geometry becomes the
/// rectangle, a missing detector becomes zero detections, a failed
/// classification becomes an unknown activity.
#[derive(Debug, Error)]
pub enum PollError {
    /// Stream unopenable or no frame returned. No observation is written;
    /// the next cycle makes a fresh attempt.
    #[error("frame acquisition failed: {0:#}")]
    Acquisition(anyhow::Error),

    /// The observation row could not be inserted. There is no safe partial
    /// state to continue from for this workstation.
    #[error("observation persistence failed: {0:#}")]
    Persistence(anyhow::Error),
}
