mod common;

use common::{client_for, fast_config, CountingBackend, GatedBackend};
use slideshot::resolver::{PlaceholderResolver, ResolutionOutcome};
use slideshot::surface::stylesheet::FAILED_TEXT;
use slideshot::surface::{PlaceholderContent, RenderSurface, SurfaceEvent, SurfacePhase};

fn placeholder(prompt: &str) -> String {
    format!(
        r#"<h2>Slide</h2><div class="ai-image" data-prompt="{}" data-width="320" data-height="240"></div>"#,
        prompt
    )
}

#[tokio::test]
async fn stale_generation_results_are_discarded() {
    let backend = GatedBackend::new();
    let (client, _) = client_for(backend.clone());
    let resolver = PlaceholderResolver::new(client);
    let surface = RenderSurface::new(&fast_config());

    let first = surface.mount(&placeholder("slow"));
    let slow = resolver.resolve(&surface);
    assert_eq!(slow.generation(), first);
    assert_eq!(slow.len(), 1);

    let second = surface.mount(&placeholder("fast"));
    assert!(second > first);
    let fast = resolver.resolve(&surface);
    assert_eq!(surface.placeholder_content(1), Some(PlaceholderContent::Generating));

    backend.release("fast");
    let outcomes = fast.finish().await;
    assert_eq!(outcomes, vec![ResolutionOutcome::Applied { handle: 1 }]);
    let applied = surface.placeholder_content(1);
    assert!(matches!(applied, Some(PlaceholderContent::Ready(_))));

    backend.release("slow");
    let outcomes = slow.finish().await;
    assert_eq!(outcomes, vec![ResolutionOutcome::Discarded { handle: 1 }]);

    // The late result left the current generation untouched.
    assert_eq!(surface.generation(), second);
    assert_eq!(surface.placeholder_content(1), applied);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn redispatch_in_same_generation_keeps_only_latest() {
    let backend = GatedBackend::new();
    let (client, _) = client_for(backend.clone());
    let resolver = PlaceholderResolver::new(client);
    let surface = RenderSurface::new(&fast_config());

    surface.mount(&placeholder("harbor"));
    let earlier = resolver.resolve(&surface);
    let later = resolver.resolve(&surface);

    backend.release("harbor");
    let later = later.finish().await;
    let earlier = earlier.finish().await;

    // Both dispatches shared the single upstream call.
    assert_eq!(backend.calls(), 1);
    assert_eq!(earlier, vec![ResolutionOutcome::Discarded { handle: 1 }]);
    assert_eq!(later, vec![ResolutionOutcome::Applied { handle: 1 }]);
}

#[tokio::test]
async fn failed_placeholders_show_the_error_indicator() {
    let backend = CountingBackend::with(std::time::Duration::ZERO, &["broken"]);
    let (client, _) = client_for(backend.clone());
    let resolver = PlaceholderResolver::new(client);
    let surface = RenderSurface::new(&fast_config());

    surface.mount(
        r#"<div class="ai-image" data-prompt="broken"></div><div class="ai-image"></div>"#,
    );
    let outcomes = resolver.resolve(&surface).finish().await;
    assert_eq!(outcomes, vec![ResolutionOutcome::Failed { handle: 0 }]);
    assert_eq!(
        surface.placeholder_content(0),
        Some(PlaceholderContent::Failed(FAILED_TEXT.to_string()))
    );
    // No prompt: never dispatched, stays empty.
    assert_eq!(surface.placeholder_content(1), Some(PlaceholderContent::Empty));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn settlement_restarts_when_superseded() {
    let surface = RenderSurface::new(&fast_config());
    let mut events = surface.subscribe();

    surface.mount("<p>one</p>");
    let waiter = {
        let surface = surface.clone();
        tokio::spawn(async move { surface.await_settled().await })
    };
    tokio::task::yield_now().await;
    let latest = surface.mount("<p>two</p>");
    let settled = waiter.await.unwrap();

    assert_eq!(settled, latest);
    assert_eq!(surface.phase(), SurfacePhase::Settled);
    assert_eq!(surface.markup(), "<p>two</p>");

    let mut saw_settled = false;
    while let Ok(event) = events.try_recv() {
        if let SurfaceEvent::Settled(g) = event {
            assert_eq!(g, latest);
            saw_settled = true;
        }
    }
    assert!(saw_settled);
}
