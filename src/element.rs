use crate::{ContentFit, DrawLease, FrameView, RenderBackend, RenderConsumer, Transform};
use gpui::{
    Element, ElementId, GlobalElementId, InspectorElementId, IntoElement, LayoutId, Window,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

/// Render-thread state shared by every [`FrameElement`] built for one pipeline.
#[derive(Clone)]
pub struct FrameSurface {
    consumer: Arc<Mutex<RenderConsumer>>,
    last_image: Arc<Mutex<Option<Arc<gpui::RenderImage>>>>,
}

impl FrameSurface {
    pub fn new(consumer: RenderConsumer) -> Self {
        Self {
            consumer: Arc::new(Mutex::new(consumer)),
            last_image: Arc::new(Mutex::new(None)),
        }
    }

    pub fn consumer(&self) -> &Arc<Mutex<RenderConsumer>> {
        &self.consumer
    }
}

/// Paints frames through a gpui window. `RenderImage` owns its own copy of
/// the pixels, so draws complete immediately and leases are not kept.
struct GpuiBackend<'a> {
    window: &'a mut Window,
    bounds: gpui::Bounds<gpui::Pixels>,
    last_image: &'a Mutex<Option<Arc<gpui::RenderImage>>>,
}

impl RenderBackend for GpuiBackend<'_> {
    fn draw_frame(
        &mut self,
        frame: &FrameView<'_>,
        transform: &Transform,
        _lease: Option<DrawLease>,
    ) {
        let Some(image_buffer) = frame.to_image() else {
            return;
        };
        let frames: SmallVec<[image::Frame; 1]> =
            SmallVec::from_elem(image::Frame::new(image_buffer), 1);
        let render_image = Arc::new(gpui::RenderImage::new(frames));

        let (x0, y0) = transform.apply(0.0, 0.0);
        let (x1, y1) = transform.apply(
            frame.format.width() as f32,
            frame.format.height() as f32,
        );
        let bounds = gpui::Bounds::new(
            self.bounds.origin + gpui::point(gpui::px(x0), gpui::px(y0)),
            gpui::size(gpui::px(x1 - x0), gpui::px(y1 - y0)),
        );

        self.window
            .paint_image(
                bounds,
                gpui::Corners::default(),
                Arc::clone(&render_image),
                0,     // frame index
                false, // grayscale
            )
            .ok();

        // Evict the previous frame from the sprite atlas.
        if let Some(previous) = self.last_image.lock().replace(render_image) {
            self.window.drop_image(previous).ok();
        }
    }

    fn draw_placeholder(&mut self, _transform: &Transform) {}
}

/// A pipeline element that implements Element trait similar to GPUI's img element
pub struct FrameElement {
    surface: FrameSurface,
    display_width: Option<gpui::Pixels>,
    display_height: Option<gpui::Pixels>,
    element_id: Option<ElementId>,
    fit: ContentFit,
}

impl FrameElement {
    pub fn new(surface: FrameSurface) -> Self {
        Self {
            surface,
            display_width: None,
            display_height: None,
            element_id: None,
            fit: ContentFit::Contain,
        }
    }

    pub fn id(mut self, id: impl Into<ElementId>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    pub fn size(mut self, width: gpui::Pixels, height: gpui::Pixels) -> Self {
        self.display_width = Some(width);
        self.display_height = Some(height);
        self
    }

    /// Set the content fit mode.
    pub fn content_fit(mut self, fit: ContentFit) -> Self {
        self.fit = fit;
        self
    }

    fn frame_size(&self) -> (u32, u32) {
        self.surface.consumer.lock().pipeline().size()
    }

    /// Get the current display dimensions, falling back to the frame size.
    fn get_display_size(&self) -> (gpui::Pixels, gpui::Pixels) {
        match (self.display_width, self.display_height) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                let (width, height) = self.frame_size();
                (gpui::px(width as f32), gpui::px(height as f32))
            }
        }
    }
}

impl Element for FrameElement {
    type RequestLayoutState = ();
    type PrepaintState = ();

    fn id(&self) -> Option<ElementId> {
        self.element_id.clone()
    }

    fn source_location(&self) -> Option<&'static core::panic::Location<'static>> {
        None
    }

    fn request_layout(
        &mut self,
        _global_id: Option<&GlobalElementId>,
        _inspector_id: Option<&InspectorElementId>,
        window: &mut Window,
        cx: &mut gpui::App,
    ) -> (LayoutId, Self::RequestLayoutState) {
        let (width, height) = self.get_display_size();

        let style = gpui::Style {
            size: gpui::Size {
                width: gpui::Length::Definite(gpui::DefiniteLength::Absolute(
                    gpui::AbsoluteLength::Pixels(width),
                )),
                height: gpui::Length::Definite(gpui::DefiniteLength::Absolute(
                    gpui::AbsoluteLength::Pixels(height),
                )),
            },
            ..Default::default()
        };

        let layout_id = window.request_layout(style, [], cx);
        (layout_id, ())
    }

    fn prepaint(
        &mut self,
        _global_id: Option<&GlobalElementId>,
        _inspector_id: Option<&InspectorElementId>,
        _bounds: gpui::Bounds<gpui::Pixels>,
        _request_layout_state: &mut Self::RequestLayoutState,
        window: &mut Window,
        _cx: &mut gpui::App,
    ) -> Self::PrepaintState {
        // Keep repainting while frames are arriving or a backlog is queued.
        let consumer = self.surface.consumer.lock();
        let pipeline = consumer.pipeline();
        if pipeline.take_frame_ready() || pipeline.queued() > 1 {
            window.request_animation_frame();
        }
    }

    fn paint(
        &mut self,
        _global_id: Option<&GlobalElementId>,
        _inspector_id: Option<&InspectorElementId>,
        bounds: gpui::Bounds<gpui::Pixels>,
        _request_layout_state: &mut Self::RequestLayoutState,
        _prepaint_state: &mut Self::PrepaintState,
        window: &mut Window,
        _cx: &mut gpui::App,
    ) {
        let (width, height) = self.frame_size();
        let transform = Transform::fit(
            self.fit,
            (width as f32, height as f32),
            (f32::from(bounds.size.width), f32::from(bounds.size.height)),
        );

        let mut backend = GpuiBackend {
            window,
            bounds,
            last_image: &self.surface.last_image,
        };
        if let Err(err) = self.surface.consumer.lock().draw(&mut backend, &transform) {
            log::error!("failed to draw frame: {err}");
        }
    }
}

impl IntoElement for FrameElement {
    type Element = Self;

    fn into_element(self) -> Self::Element {
        self
    }
}

/// Helper function to create a frame element
pub fn frame_element(surface: FrameSurface) -> FrameElement {
    FrameElement::new(surface)
}
