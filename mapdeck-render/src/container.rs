//! Positioning container for vector hosts.
//!
//! The host's overlay pane uses viewport-centered coordinates, so the
//! container is shifted by half the viewport to put its origin on the
//! host's top-left corner. Resized on every host layout pass.

use mapdeck_core::ViewportSize;

use crate::host::{Element, MapHost};

/// Container geometry in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContainerLayout {
    pub width: u32,
    pub height: u32,
    pub left: f64,
    pub top: f64,
}

impl ContainerLayout {
    /// Full-viewport layout inside a centered pane.
    pub fn centered(size: ViewportSize) -> Self {
        Self {
            width: size.width,
            height: size.height,
            left: -f64::from(size.width) / 2.0,
            top: -f64::from(size.height) / 2.0,
        }
    }
}

pub(crate) fn px(value: impl std::fmt::Display) -> String {
    format!("{value}px")
}

pub struct PositioningContainer<E> {
    element: Option<E>,
}

impl<E> Default for PositioningContainer<E> {
    fn default() -> Self {
        Self { element: None }
    }
}

impl<E: Element> PositioningContainer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        self.element.is_some()
    }

    /// Create the container in the host's overlay pane. No-op if already
    /// mounted; returns `false` if the pane is not available yet.
    pub fn mount<H>(&mut self, host: &mut H) -> bool
    where
        H: MapHost<Element = E>,
    {
        if self.element.is_some() {
            return true;
        }
        let Some(mut element) = host.create_overlay_container() else {
            log::debug!("Overlay pane not ready; positioning container deferred");
            return false;
        };
        element.set_style("position", "absolute");
        self.element = Some(element);
        true
    }

    /// Track the host viewport. Silently skipped until both the container
    /// and the viewport exist.
    pub fn layout(&mut self, viewport: Option<ViewportSize>) -> Option<ContainerLayout> {
        let element = self.element.as_mut()?;
        let layout = ContainerLayout::centered(viewport?);

        element.set_style("width", &px(layout.width));
        element.set_style("height", &px(layout.height));
        element.set_style("left", &px(layout.left));
        element.set_style("top", &px(layout.top));
        Some(layout)
    }

    pub fn unmount(&mut self) {
        if let Some(mut element) = self.element.take() {
            element.remove();
        }
    }
}
