//! The render surface: an isolated, deterministically styled document that
//! slide markup is injected into, one generation at a time.
//!
//! A surface moves through `Constructing → ContentInjected → FontsPending →
//! Settled` for every generation. Injecting new markup starts a fresh
//! generation immediately; work belonging to an older generation is never
//! applied to the new one (see [`RenderSurface::apply_resolution`]).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::sync::broadcast;

pub mod fonts;
pub mod markup;
pub mod stylesheet;

pub use fonts::{FontBook, Typeface};
pub use markup::{Block, Placeholder, PlaceholderContent, SlideDocument};
pub use stylesheet::{Color, Stylesheet};

use crate::{lock, RenderConfig, SettleConfig, Viewport};

/// Lifecycle phase of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfacePhase {
    Constructing,
    ContentInjected,
    FontsPending,
    Settled,
}

/// Identity of one injected version of the surface content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

/// Token identifying one resolution attempt of one placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// Notifications for observers of the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Mounted(Generation),
    /// Visible content changed; a re-capture may be warranted.
    ContentChanged(Generation),
    Settled(Generation),
}

/// Race-guard state for one placeholder of the current generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderRecord {
    /// Block index of the placeholder in the document.
    pub handle: usize,
    pub prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub request_id: Option<RequestId>,
}

/// A placeholder that has just been marked as generating.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPlaceholder {
    pub generation: Generation,
    pub handle: usize,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub request_id: RequestId,
}

struct SurfaceState {
    generation: Generation,
    phase: SurfacePhase,
    markup: String,
    document: SlideDocument,
    placeholders: Vec<PlaceholderRecord>,
    next_request_id: u64,
}

struct SurfaceShared {
    state: Mutex<SurfaceState>,
    events: broadcast::Sender<SurfaceEvent>,
    fonts: FontBook,
    stylesheet: Arc<Stylesheet>,
    viewport: Viewport,
    settle: SettleConfig,
}

/// Immutable view of a surface used for capture.
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    pub generation: Generation,
    pub phase: SurfacePhase,
    pub document: SlideDocument,
    pub stylesheet: Arc<Stylesheet>,
    pub typeface: Typeface,
    pub viewport: Viewport,
}

impl SurfaceFrame {
    /// Capture precondition: the frame must come from a settled surface.
    pub fn ensure_settled(&self) -> crate::Result<()> {
        if self.phase == SurfacePhase::Settled {
            Ok(())
        } else {
            Err(crate::Error::SurfaceNotReady {
                generation: self.generation.0,
                phase: self.phase,
            })
        }
    }
}

/// Shared handle to a render surface. Clones refer to the same surface.
#[derive(Clone)]
pub struct RenderSurface {
    shared: Arc<SurfaceShared>,
}

impl RenderSurface {
    pub fn new(config: &RenderConfig) -> Self {
        Self::with_stylesheet(config, Stylesheet::default())
    }

    pub fn with_stylesheet(config: &RenderConfig, stylesheet: Stylesheet) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(SurfaceShared {
                state: Mutex::new(SurfaceState {
                    generation: Generation::default(),
                    phase: SurfacePhase::Constructing,
                    markup: String::new(),
                    document: SlideDocument::default(),
                    placeholders: Vec::new(),
                    next_request_id: 0,
                }),
                events,
                fonts: FontBook::new(config.font_paths.clone()),
                stylesheet: Arc::new(stylesheet),
                viewport: config.viewport,
                settle: config.settle.clone(),
            }),
        }
    }

    /// Inject `markup` as a new generation, superseding the current one.
    ///
    /// Construction is synchronous: the returned generation is already in
    /// the `ContentInjected` phase.
    pub fn mount(&self, markup: &str) -> Generation {
        let document = SlideDocument::parse(markup);
        let placeholders = document
            .placeholder_handles()
            .into_iter()
            .filter_map(|handle| {
                document.placeholder(handle).map(|p| PlaceholderRecord {
                    handle,
                    prompt: p.prompt.clone(),
                    width: p.width,
                    height: p.height,
                    request_id: None,
                })
            })
            .collect::<Vec<_>>();

        let generation = {
            let mut state = lock(&self.shared.state);
            state.generation = state.generation.next();
            state.phase = SurfacePhase::Constructing;
            state.markup = markup.to_string();
            state.document = document;
            state.placeholders = placeholders;
            state.phase = SurfacePhase::ContentInjected;
            state.generation
        };
        debug!("surface mounted generation {}", generation.0);
        self.emit(SurfaceEvent::Mounted(generation));
        generation
    }

    /// Wait until the current generation has settled and return it.
    ///
    /// Waits for font readiness (when fonts are configured) and then the
    /// configured number of frame ticks. If a newer generation is mounted in
    /// the meantime, settlement restarts for that generation.
    pub async fn await_settled(&self) -> Generation {
        loop {
            let generation = {
                let mut state = lock(&self.shared.state);
                if state.phase == SurfacePhase::Settled {
                    return state.generation;
                }
                if self.shared.fonts.is_pending() {
                    state.phase = SurfacePhase::FontsPending;
                }
                state.generation
            };

            self.shared.fonts.ready().await;
            let interval = Duration::from_millis(self.shared.settle.frame_interval_ms);
            for _ in 0..self.shared.settle.frame_ticks {
                if interval.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(interval).await;
                }
            }

            let settled = {
                let mut state = lock(&self.shared.state);
                if state.generation == generation {
                    state.phase = SurfacePhase::Settled;
                    true
                } else {
                    false
                }
            };
            if settled {
                debug!("surface settled generation {}", generation.0);
                self.emit(SurfaceEvent::Settled(generation));
                self.emit(SurfaceEvent::ContentChanged(generation));
                return generation;
            }
            debug!("generation {} superseded before settling", generation.0);
        }
    }

    /// Assign a fresh request id to every placeholder of the current
    /// generation that has a prompt, and mark it as generating.
    ///
    /// Placeholders without a prompt are left untouched.
    pub fn begin_resolution(&self) -> Vec<PendingPlaceholder> {
        let pending = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            let generation = state.generation;
            let mut pending = Vec::new();
            for record in state.placeholders.iter_mut() {
                let prompt = match &record.prompt {
                    Some(prompt) => prompt.clone(),
                    None => continue,
                };
                state.next_request_id += 1;
                let request_id = RequestId(state.next_request_id);
                record.request_id = Some(request_id);
                if let Some(p) = state.document.placeholder_mut(record.handle) {
                    p.content = PlaceholderContent::Generating;
                }
                pending.push(PendingPlaceholder {
                    generation,
                    handle: record.handle,
                    prompt,
                    width: record.width,
                    height: record.height,
                    request_id,
                });
            }
            pending
        };
        if let Some(first) = pending.first() {
            self.emit(SurfaceEvent::ContentChanged(first.generation));
        }
        pending
    }

    /// Apply a resolution result if, and only if, the placeholder at
    /// `handle` still carries `request_id`. Returns whether it was applied.
    pub fn apply_resolution(
        &self,
        handle: usize,
        request_id: RequestId,
        content: PlaceholderContent,
    ) -> bool {
        let generation = {
            let mut guard = lock(&self.shared.state);
            let state = &mut *guard;
            let current = state
                .placeholders
                .iter()
                .find(|r| r.handle == handle)
                .and_then(|r| r.request_id);
            if current != Some(request_id) {
                return false;
            }
            match state.document.placeholder_mut(handle) {
                Some(p) => p.content = content,
                None => return false,
            }
            state.generation
        };
        self.emit(SurfaceEvent::ContentChanged(generation));
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.shared.events.subscribe()
    }

    pub fn generation(&self) -> Generation {
        lock(&self.shared.state).generation
    }

    pub fn phase(&self) -> SurfacePhase {
        lock(&self.shared.state).phase
    }

    pub fn markup(&self) -> String {
        lock(&self.shared.state).markup.clone()
    }

    pub fn placeholders(&self) -> Vec<PlaceholderRecord> {
        lock(&self.shared.state).placeholders.clone()
    }

    /// Current content of the placeholder at `handle`.
    pub fn placeholder_content(&self, handle: usize) -> Option<PlaceholderContent> {
        lock(&self.shared.state)
            .document
            .placeholder(handle)
            .map(|p| p.content.clone())
    }

    pub fn viewport(&self) -> Viewport {
        self.shared.viewport
    }

    pub fn stylesheet(&self) -> Arc<Stylesheet> {
        Arc::clone(&self.shared.stylesheet)
    }

    /// Snapshot the surface for capture.
    pub fn frame(&self) -> SurfaceFrame {
        let state = lock(&self.shared.state);
        SurfaceFrame {
            generation: state.generation,
            phase: state.phase,
            document: state.document.clone(),
            stylesheet: Arc::clone(&self.shared.stylesheet),
            typeface: self.shared.fonts.current(),
            viewport: self.shared.viewport,
        }
    }

    fn emit(&self, event: SurfaceEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }
}
