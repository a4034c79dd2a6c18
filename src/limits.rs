//! Plan-based size and page limits.
//!
//! Runs after loading and chunking but strictly before indexing: a rejected
//! document never has a single record written to the vector store.

use crate::config::Plan;
use crate::error::IngestError;
use crate::models::DocumentFormat;

/// Why a document was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    PayloadTooLarge { size: u64, limit: u64 },
    TooManyUnits { count: usize, limit: usize },
}

impl From<RejectReason> for IngestError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::PayloadTooLarge { size, limit } => {
                IngestError::PayloadTooLarge { size, limit }
            }
            RejectReason::TooManyUnits { count, limit } => {
                IngestError::TooManyUnits { count, limit }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Accept,
    Reject(RejectReason),
}

/// Check a document against its plan. The byte size is checked first.
pub fn check_limits(document_byte_size: u64, unit_count: usize, plan: &Plan) -> LimitDecision {
    if document_byte_size > plan.max_file_size {
        return LimitDecision::Reject(RejectReason::PayloadTooLarge {
            size: document_byte_size,
            limit: plan.max_file_size,
        });
    }
    if unit_count > plan.pages_per_pdf {
        return LimitDecision::Reject(RejectReason::TooManyUnits {
            count: unit_count,
            limit: plan.pages_per_pdf,
        });
    }
    LimitDecision::Accept
}

/// Unit count the page ceiling applies to: pages for PDF, chunks for EPUB.
pub fn unit_count_for(format: DocumentFormat, page_count: usize, chunk_count: usize) -> usize {
    match format {
        DocumentFormat::Pdf => page_count,
        DocumentFormat::Epub => chunk_count,
    }
}
