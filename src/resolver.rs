//! Placeholder resolution: fetch images for every placeholder of the current
//! generation and splice them in, ignoring results that arrive after the
//! placeholder was re-dispatched or the surface moved on.

use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::images::ImageClient;
use crate::surface::stylesheet::FAILED_TEXT;
use crate::surface::{Generation, PendingPlaceholder, PlaceholderContent, RenderSurface};

/// What happened to one dispatched placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The image was spliced in.
    Applied { handle: usize },
    /// The error indicator was spliced in.
    Failed { handle: usize },
    /// The surface no longer expected this result; nothing changed.
    Discarded { handle: usize },
}

/// The dispatches started for one generation.
pub struct ResolutionBatch {
    generation: Generation,
    tasks: Vec<JoinHandle<ResolutionOutcome>>,
}

impl ResolutionBatch {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every dispatch to settle. Order matches dispatch order.
    pub async fn finish(self) -> Vec<ResolutionOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("placeholder task aborted: {}", e),
            }
        }
        outcomes
    }
}

#[derive(Clone)]
pub struct PlaceholderResolver {
    client: ImageClient,
}

impl PlaceholderResolver {
    pub fn new(client: ImageClient) -> Self {
        Self { client }
    }

    /// Dispatch every placeholder of the surface's current generation.
    ///
    /// Each placeholder is resolved on its own task; completion order is
    /// unspecified. Must be called from within a tokio runtime.
    pub fn resolve(&self, surface: &RenderSurface) -> ResolutionBatch {
        let generation = surface.generation();
        let tasks = surface
            .begin_resolution()
            .into_iter()
            .map(|pending| tokio::spawn(resolve_one(self.client.clone(), surface.clone(), pending)))
            .collect::<Vec<_>>();
        debug!(
            "dispatched {} placeholder(s) for generation {}",
            tasks.len(),
            generation.0
        );
        ResolutionBatch { generation, tasks }
    }
}

async fn resolve_one(
    client: ImageClient,
    surface: RenderSurface,
    pending: PendingPlaceholder,
) -> ResolutionOutcome {
    let handle = pending.handle;
    let (content, ok) = match client
        .resolve(&pending.prompt, pending.width, pending.height)
        .await
    {
        Ok(payload) => (PlaceholderContent::Ready(payload), true),
        Err(e) => {
            warn!("placeholder {:?} failed: {}", pending.prompt, e);
            (PlaceholderContent::Failed(FAILED_TEXT.to_string()), false)
        }
    };

    if !surface.apply_resolution(handle, pending.request_id, content) {
        debug!(
            "discarding stale result for placeholder {} of generation {}",
            handle, pending.generation.0
        );
        return ResolutionOutcome::Discarded { handle };
    }
    if ok {
        ResolutionOutcome::Applied { handle }
    } else {
        ResolutionOutcome::Failed { handle }
    }
}
