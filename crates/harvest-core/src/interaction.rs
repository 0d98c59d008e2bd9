//! Synthetic "human" click.

use tracing::debug;

use crate::config::InteractionTuning;
use crate::dom::{NodeId, Rect};
use crate::errors::HarvestError;
use crate::host::{HostPage, InteractionEvent, PointerEventKind};

/// Events fired before focus moves to the target.
const PRESS_SEQUENCE: [PointerEventKind; 6] = [
    PointerEventKind::PointerOver,
    PointerEventKind::MouseOver,
    PointerEventKind::PointerEnter,
    PointerEventKind::MouseEnter,
    PointerEventKind::PointerDown,
    PointerEventKind::MouseDown,
];

/// Events fired after focus.
const RELEASE_SEQUENCE: [PointerEventKind; 3] = [
    PointerEventKind::PointerUp,
    PointerEventKind::MouseUp,
    PointerEventKind::Click,
];

/// Click `node` the way a pointer would.
///
/// Steps:
/// 1. Reject handles that are not attached elements
/// 2. Scroll the element to the viewport centre and wait one frame
/// 3. Fire the pointer/mouse sequence at an interior point, focusing between press and release
/// 4. Pause for the configured settle delay
pub async fn human_click<H>(
    host: &H,
    node: NodeId,
    tuning: &InteractionTuning,
) -> Result<(), HarvestError>
where
    H: HostPage + ?Sized,
{
    let snapshot = host.snapshot().await?;
    if !snapshot.contains(node) {
        return Err(HarvestError::InvalidInput(format!(
            "node {node} is not an attached element"
        )));
    }

    host.scroll_into_view(node).await?;
    host.next_frame().await?;

    let snapshot = host.snapshot().await?;
    let rect = snapshot
        .get(node)
        .map(|data| data.rect)
        .ok_or_else(|| HarvestError::InvalidInput(format!("node {node} detached while scrolling")))?;
    let (client_x, client_y) = interior_point(rect, tuning.edge_margin_px);
    debug!(%node, client_x, client_y, "dispatching click sequence");

    for kind in PRESS_SEQUENCE {
        host.dispatch(node, InteractionEvent { kind, client_x, client_y })
            .await?;
    }
    host.focus(node).await?;
    for kind in RELEASE_SEQUENCE {
        host.dispatch(node, InteractionEvent { kind, client_x, client_y })
            .await?;
    }

    tokio::time::sleep(tuning.click_settle()).await;
    Ok(())
}

/// Centre of `rect`, kept `margin` pixels inside its edges. Boxes thinner
/// than two margins use their midline.
pub fn interior_point(rect: Rect, margin: f64) -> (f64, f64) {
    let offset = |extent: f64| {
        if extent < 2.0 * margin {
            extent / 2.0
        } else {
            (extent / 2.0).clamp(margin, extent - margin)
        }
    };
    (rect.left() + offset(rect.width), rect.top() + offset(rect.height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{DomSnapshot, ElementSpec, Viewport};
    use crate::host::memory::MemoryHost;
    use std::time::Duration;

    #[test]
    fn interior_point_is_centre_for_normal_boxes() {
        let (x, y) = interior_point(Rect::new(100.0, 50.0, 40.0, 20.0), 2.0);
        assert_eq!((x, y), (120.0, 60.0));
    }

    #[test]
    fn interior_point_stays_inside_thin_boxes() {
        let rect = Rect::new(10.0, 20.0, 3.0, 1.0);
        let (x, y) = interior_point(rect, 2.0);
        assert_eq!((x, y), (11.5, 20.5));
        assert!(x > rect.left() && x < rect.right());
        assert!(y > rect.top() && y < rect.bottom());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_full_sequence_in_order() {
        let mut dom = DomSnapshot::new(Viewport::default());
        let root = dom.root();
        let button = dom.append(root, ElementSpec::new("button").rect(10.0, 10.0, 80.0, 30.0));
        let host = MemoryHost::new(dom, "https://chatgpt.com/");

        let started = tokio::time::Instant::now();
        human_click(&host, button, &InteractionTuning::default())
            .await
            .expect("click");

        assert_eq!(
            host.events_for(button),
            vec![
                PointerEventKind::PointerOver,
                PointerEventKind::MouseOver,
                PointerEventKind::PointerEnter,
                PointerEventKind::MouseEnter,
                PointerEventKind::PointerDown,
                PointerEventKind::MouseDown,
                PointerEventKind::PointerUp,
                PointerEventKind::MouseUp,
                PointerEventKind::Click,
            ]
        );
        assert_eq!(host.focused(), Some(button));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn rejects_unknown_nodes() {
        let host = MemoryHost::new(DomSnapshot::new(Viewport::default()), "https://chatgpt.com/");
        let err = human_click(&host, NodeId(77), &InteractionTuning::default())
            .await
            .expect_err("unknown node");
        assert!(matches!(err, HarvestError::InvalidInput(_)));
    }
}
