//! The page status transition graph: which statuses a page may move
//! between, and in which direction.

use crate::error::CoreError;
use crate::model::PageStatus;

/// Legal next states for `from`. Transitions are one-way; `Error` is
/// reachable from every non-terminal state but is not listed per-state
/// below to keep the graph readable — `allowed_next` adds it uniformly.
fn forward_edges(from: PageStatus) -> &'static [PageStatus] {
    use PageStatus::*;
    match from {
        PendingRender => &[Rendering],
        Rendering => &[Ready],
        Ready => &[PendingOcr],
        PendingOcr => &[Recognizing],
        Recognizing => &[OcrSuccess],
        OcrSuccess => &[PendingGen],
        PendingGen => &[GeneratingMarkdown],
        GeneratingMarkdown => &[MarkdownSuccess],
        MarkdownSuccess => &[GeneratingPdf],
        GeneratingPdf => &[PdfSuccess],
        PdfSuccess => &[GeneratingDocx],
        GeneratingDocx => &[Completed],
        Completed | Error => &[],
    }
}

/// Whether `from` may transition to `Error`. Every stage that performs
/// fallible work can error; terminal states cannot.
fn can_error(from: PageStatus) -> bool {
    !matches!(from, PageStatus::Completed | PageStatus::Error)
}

/// All legal next states for `from`, including `Error` where applicable.
pub fn allowed_next(from: PageStatus) -> Vec<PageStatus> {
    let mut next = forward_edges(from).to_vec();
    if can_error(from) {
        next.push(PageStatus::Error);
    }
    next
}

/// Validate and return the destination status for a transition, or
/// [`CoreError::InvalidTransition`] if `from -> to` is not a legal edge.
pub fn transition(from: PageStatus, to: PageStatus) -> Result<PageStatus, CoreError> {
    if allowed_next(from).contains(&to) {
        Ok(to)
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PageStatus::*;

    #[test]
    fn happy_path_image_page() {
        assert!(transition(Ready, PendingOcr).is_ok());
        assert!(transition(PendingOcr, Recognizing).is_ok());
        assert!(transition(Recognizing, OcrSuccess).is_ok());
        assert!(transition(OcrSuccess, PendingGen).is_ok());
        assert!(transition(PendingGen, GeneratingMarkdown).is_ok());
        assert!(transition(GeneratingMarkdown, MarkdownSuccess).is_ok());
        assert!(transition(MarkdownSuccess, GeneratingPdf).is_ok());
        assert!(transition(GeneratingPdf, PdfSuccess).is_ok());
        assert!(transition(PdfSuccess, GeneratingDocx).is_ok());
        assert!(transition(GeneratingDocx, Completed).is_ok());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(transition(Ready, Completed).is_err());
        assert!(transition(PendingRender, Recognizing).is_err());
        assert!(transition(Completed, PendingRender).is_err());
    }

    #[test]
    fn error_reachable_from_every_in_flight_stage_only() {
        assert!(transition(Rendering, Error).is_ok());
        assert!(transition(Recognizing, Error).is_ok());
        assert!(transition(GeneratingDocx, Error).is_ok());
        assert!(transition(Completed, Error).is_err());
        assert!(transition(Error, Error).is_err());
    }

    #[test]
    fn terminal_states_have_no_forward_edges() {
        assert!(allowed_next(Completed).is_empty());
        assert!(allowed_next(Error).is_empty());
    }
}
