//! Messages exchanged with the compute context.
//!
//! Sample buffers are moved into a message and owned by whoever holds it;
//! nothing on either side aliases them.

use crate::model::stem_model::StemModel;
use std::{fmt, sync::Arc};

/// Orchestrator → compute context.
pub enum WorkerRequest {
    /// Install (and warm up) a model. Fire-and-forget.
    InitModel {
        model_name: String,
        model: Arc<dyn StemModel>,
    },
    ProcessChunk(ProcessChunk),
    /// Best-effort hint that a request no longer has a listener.
    CancelRequest { request_id: u64 },
    Shutdown,
}

pub struct ProcessChunk {
    pub request_id: u64,
    pub channel_buffers: Vec<Vec<f32>>,
    pub channel_length: usize,
    pub sample_rate: u32,
    pub stem_count: usize,
    pub model_name: String,
}

/// Compute context → orchestrator.
#[derive(Debug)]
pub enum WorkerResponse {
    ChunkResult {
        request_id: u64,
        stem_buffers: Vec<Vec<f32>>,
    },
    ChunkError {
        request_id: u64,
        error: String,
    },
    /// Informational only; never settles a request.
    Progress { data: String },
}

impl fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRequest::InitModel { model_name, .. } => f
                .debug_struct("InitModel")
                .field("model_name", model_name)
                .finish_non_exhaustive(),
            WorkerRequest::ProcessChunk(p) => f
                .debug_struct("ProcessChunk")
                .field("request_id", &p.request_id)
                .field("channels", &p.channel_buffers.len())
                .field("channel_length", &p.channel_length)
                .field("stem_count", &p.stem_count)
                .field("model_name", &p.model_name)
                .finish(),
            WorkerRequest::CancelRequest { request_id } => f
                .debug_struct("CancelRequest")
                .field("request_id", request_id)
                .finish(),
            WorkerRequest::Shutdown => f.write_str("Shutdown"),
        }
    }
}
