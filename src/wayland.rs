// Layer-shell host for the floating window

use crate::app::{AppContext, LaunchOptions, RfdPicker};
use crate::drop_loader::{DecodeOutcome, DropPayload, URI_LIST_MIME};
use crate::image_loader::ImageData;
use crate::input::{scroll_opacity_delta, scroll_zoom_factor, Gesture, PointerTracker, OPACITY_STEP};
use crate::layout::{SettingsControl, SettingsLayout, TitleBarLayout, TitleControl};
use crate::render::{CpuRenderer, Scene, SettingsView};
use crate::settings::SizeField;
use crate::viewport::Viewport;
use crate::wgpu_renderer::WgpuRenderer;
use crate::window::{
    calculate_limited_size, detect_resize_edge, resize_geometry, FrameAnimation, ResizeEdge,
    WindowChrome, WindowGeometry, WindowLevel, WindowManager,
};
use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    data_device_manager::{
        data_device::{DataDevice, DataDeviceData, DataDeviceHandler},
        data_offer::{DataOfferHandler, DragOffer},
        data_source::DataSourceHandler,
        DataDeviceManagerState, WritePipe,
    },
    delegate_compositor, delegate_data_device, delegate_keyboard, delegate_layer, delegate_output,
    delegate_pointer, delegate_registry, delegate_seat, delegate_shm,
    output::{OutputHandler, OutputState},
    reexports::{
        calloop::{channel, EventLoop},
        calloop_wayland_source::WaylandSource,
    },
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    seat::{
        keyboard::{KeyEvent, KeyboardHandler, Keysym, Modifiers},
        pointer::{PointerEvent, PointerEventKind, PointerHandler},
        Capability, SeatHandler, SeatState,
    },
    shell::{
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
        WaylandSurface,
    },
    shm::{
        slot::{Buffer, SlotPool},
        Shm, ShmHandler,
    },
};
use std::time::Instant;
use wayland_client::{
    globals::registry_queue_init,
    protocol::{
        wl_data_device::WlDataDevice,
        wl_data_device_manager::DndAction,
        wl_data_source::WlDataSource,
        wl_keyboard, wl_output, wl_pointer, wl_seat, wl_shm, wl_surface,
    },
    Connection, Dispatch, Proxy, QueueHandle,
};
use wayland_protocols::wp::pointer_gestures::zv1::client::{
    zwp_pointer_gesture_pinch_v1::{self, ZwpPointerGesturePinchV1},
    zwp_pointer_gestures_v1::ZwpPointerGesturesV1,
};

/// Linux input code of the primary button
const BTN_LEFT: u32 = 272;

/// Largest shm buffer we allocate (64MB)
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Window size when nothing else decides it
const DEFAULT_SIZE: u32 = 400;

/// Share of the screen area an initial image may cover
const INITIAL_SCREEN_FRACTION: f32 = 0.20;

fn layer_for(level: WindowLevel) -> Layer {
    match level {
        WindowLevel::Floating => Layer::Overlay,
        // Layer shell has no normal stacking; bottom sits under regular windows
        WindowLevel::Normal => Layer::Bottom,
    }
}

/// The layer surface seen through the `WindowManager` seam
struct LayerWindow {
    layer_surface: LayerSurface,
    conn: Connection,
    qh: QueueHandle<WaylandApp>,
    size: WindowGeometry,
    margin_left: i32,
    margin_top: i32,
    level: WindowLevel,
    animation: Option<FrameAnimation>,
    needs_redraw: bool,
}

impl LayerWindow {
    fn new(
        layer_surface: LayerSurface,
        conn: Connection,
        qh: QueueHandle<WaylandApp>,
        size: WindowGeometry,
        margins: (i32, i32),
        level: WindowLevel,
    ) -> Self {
        Self {
            layer_surface,
            conn,
            qh,
            size,
            margin_left: margins.0,
            margin_top: margins.1,
            level,
            animation: None,
            needs_redraw: true,
        }
    }

    fn wl_surface(&self) -> &wl_surface::WlSurface {
        self.layer_surface.wl_surface()
    }

    fn margins(&self) -> (i32, i32) {
        (self.margin_left, self.margin_top)
    }

    /// Move the window by re-anchoring its top-left margins
    fn set_margins(&mut self, margin_left: i32, margin_top: i32) {
        self.margin_left = margin_left;
        self.margin_top = margin_top;
        self.layer_surface.set_anchor(Anchor::TOP | Anchor::LEFT);
        self.layer_surface.set_margin(margin_top, 0, 0, margin_left);
        self.layer_surface.commit();
    }

    fn apply_size(&mut self, size: WindowGeometry) {
        self.size = size;
        self.layer_surface.set_size(size.width, size.height);
        self.layer_surface.commit();
        self.needs_redraw = true;
    }

    fn request_frame(&self) {
        let surface = self.wl_surface();
        surface.frame(&self.qh, surface.clone());
    }

    /// Advance a running resize animation. Returns true while frames are still needed.
    fn step_animation(&mut self, now: Instant) -> bool {
        let Some(animation) = self.animation else {
            return false;
        };
        let (size, done) = animation.sample(now);
        if done {
            self.animation = None;
        } else {
            self.request_frame();
        }
        self.apply_size(size);
        !done
    }

    fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }
}

impl WindowManager for LayerWindow {
    fn apply_chrome(&mut self, chrome: &WindowChrome) {
        debug!("Applying window chrome: {:?}", chrome);
        // Transparent by default: no opaque region is ever set
        self.layer_surface
            .set_keyboard_interactivity(KeyboardInteractivity::OnDemand);
        self.layer_surface.set_anchor(Anchor::TOP | Anchor::LEFT);
        self.layer_surface
            .set_margin(self.margin_top, 0, 0, self.margin_left);
        self.layer_surface.set_size(self.size.width, self.size.height);
    }

    fn set_level(&mut self, level: WindowLevel) {
        if level != self.level {
            self.layer_surface.set_layer(layer_for(level));
            self.level = level;
        }
        self.layer_surface.commit();
        // A blocking file dialog may follow; the compositor must see this first
        if let Err(e) = self.conn.flush() {
            warn!("Failed to flush Wayland connection: {}", e);
        }
    }

    fn level(&self) -> WindowLevel {
        self.level
    }

    fn set_frame_size(&mut self, size: WindowGeometry, animate: bool) {
        let size = size.clamped();
        if animate && size != self.size {
            self.animation = Some(FrameAnimation::new(self.size, size, Instant::now()));
            self.request_frame();
            self.layer_surface.commit();
        } else {
            self.animation = None;
            self.apply_size(size);
        }
    }

    fn frame_size(&self) -> WindowGeometry {
        self.animation.map_or(self.size, |a| a.target())
    }

    fn request_redraw(&mut self) {
        self.needs_redraw = true;
    }
}

/// What a primary-button press landed on, in hit-test order
#[derive(Debug, Clone, Copy, PartialEq)]
enum PressTarget {
    Settings(SettingsControl),
    SettingsPanel,
    OutsideSettings,
    Title(TitleControl),
    Resize(ResizeEdge),
    Image,
    Background,
}

/// Window state captured at press time, for moves and edge resizes
#[derive(Debug, Clone, Copy)]
struct PressOrigin {
    size: WindowGeometry,
    margins: (i32, i32),
    /// Pointer position in output space (surface position plus margins)
    pointer: (f64, f64),
}

fn resolve_press(
    view: WindowGeometry,
    settings_open: bool,
    controls_shown: bool,
    viewport: &Viewport,
    x: f64,
    y: f64,
) -> PressTarget {
    if settings_open {
        let layout = SettingsLayout::new(view);
        if !layout.contains(x, y) {
            return PressTarget::OutsideSettings;
        }
        return layout
            .hit(x, y)
            .map_or(PressTarget::SettingsPanel, PressTarget::Settings);
    }
    if controls_shown {
        if let Some(control) = TitleBarLayout::new(view).hit(x, y) {
            return PressTarget::Title(control);
        }
    }
    if let Some(edge) = detect_resize_edge(view, x, y) {
        return PressTarget::Resize(edge);
    }
    if viewport.hit_image(view.as_tuple(), x, y) {
        return PressTarget::Image;
    }
    PressTarget::Background
}

/// Shell state: protocol objects, pointer bookkeeping and renderers
struct WaylandApp {
    registry_state: RegistryState,
    seat_state: SeatState,
    output_state: OutputState,
    shm: Shm,
    // Drag-and-drop source of dropped files
    data_device_manager: Option<DataDeviceManagerState>,
    data_device: Option<DataDevice>,
    drag_accepted: bool,
    // Actions the drag source offers and the one the compositor picked
    drag_source_actions: DndAction,
    drag_action: DndAction,
    // Touchpad pinch, when the compositor offers it
    pointer_gestures: Option<ZwpPointerGesturesV1>,
    pinch: Option<ZwpPointerGesturePinchV1>,

    // Raw wl_display handed to wgpu
    display_ptr: *mut std::ffi::c_void,

    ctx: AppContext<LayerWindow, RfdPicker>,
    drop_sender: channel::Sender<DecodeOutcome>,
    should_exit: bool,

    // Buffer management
    pool: Option<SlotPool>,
    buffer: Option<Buffer>,
    configured: bool,
    cpu_renderer: CpuRenderer,

    // Pointer state
    pointer_pos: (f64, f64),
    hovered: bool,
    modifiers: Modifiers,
    tracker: PointerTracker<PressTarget>,
    press_origin: Option<PressOrigin>,
    // Cumulative factor of a Ctrl+scroll zoom
    scroll_zoom: Option<f64>,

    // GPU rendering
    use_gpu: bool,
    gpu_renderer: Option<WgpuRenderer>,
    gpu_initialized: bool,
    gpu_generation: u64,
}

impl WaylandApp {
    fn window(&self) -> &LayerWindow {
        self.ctx.window()
    }

    fn controls_shown(&self) -> bool {
        self.hovered && self.ctx.chrome().show_controls
    }

    /// Anything the GPU path cannot draw
    fn overlay_visible(&self) -> bool {
        !self.ctx.viewport().has_image() || self.ctx.settings().is_visible() || self.controls_shown()
    }

    fn output_pointer(&self, x: f64, y: f64) -> (f64, f64) {
        let (ml, mt) = self.window().margins();
        (x + ml as f64, y + mt as f64)
    }

    fn deliver_to_loop(&self) -> impl FnOnce(DecodeOutcome) + Send + 'static {
        let sender = self.drop_sender.clone();
        move |outcome| {
            if sender.send(outcome).is_err() {
                debug!("Event loop gone, dropping decode result");
            }
        }
    }

    fn ensure_data_device(&mut self, qh: &QueueHandle<Self>, seat: &wl_seat::WlSeat) {
        if self.data_device.is_none() {
            if let Some(manager) = &self.data_device_manager {
                self.data_device = Some(manager.get_data_device(qh, seat));
            }
        }
    }

    fn end_scroll_zoom(&mut self) {
        if self.scroll_zoom.take().is_some() {
            self.ctx.end_pinch();
        }
    }

    fn on_press(&mut self, x: f64, y: f64) {
        let view = self.window().size;
        let target = resolve_press(
            view,
            self.ctx.settings().is_visible(),
            self.controls_shown(),
            self.ctx.viewport(),
            x,
            y,
        );
        debug!("Press at ({:.0}, {:.0}) on {:?}", x, y, target);

        if target == PressTarget::Settings(SettingsControl::OpacitySlider) {
            let value = SettingsLayout::new(view).slider_value(x);
            self.ctx.settings_mut().set_sliding(true);
            self.ctx.set_opacity(value);
        }

        self.press_origin = Some(PressOrigin {
            size: view,
            margins: self.window().margins(),
            pointer: self.output_pointer(x, y),
        });
        self.tracker.press(target, x, y);
    }

    fn on_motion(&mut self, x: f64, y: f64) {
        let Some(target) = self.tracker.target() else {
            return;
        };
        for gesture in self.tracker.motion(x, y) {
            match gesture {
                Gesture::DragStart => debug!("Drag started on {:?}", target),
                Gesture::DragMove { dx, dy } => self.on_drag_move(target, x, y, dx, dy),
                _ => {}
            }
        }
    }

    fn on_drag_move(&mut self, target: PressTarget, x: f64, y: f64, dx: f64, dy: f64) {
        let Some(origin) = self.press_origin else {
            return;
        };
        let pointer = self.output_pointer(x, y);
        let moved = (pointer.0 - origin.pointer.0, pointer.1 - origin.pointer.1);

        match target {
            PressTarget::Settings(SettingsControl::OpacitySlider) if self.ctx.settings().is_sliding() => {
                let value = SettingsLayout::new(self.window().size).slider_value(x);
                self.ctx.set_opacity(value);
            }
            PressTarget::Image => {
                // Offsets live in unscaled space; divide so the image tracks the pointer
                let scale = self.ctx.viewport().transform().scale;
                self.ctx.on_drag((dx / scale, dy / scale));
            }
            PressTarget::Resize(edge) => {
                let (size, (ml, mt)) = resize_geometry(
                    edge,
                    origin.size,
                    origin.margins,
                    moved.0 as i32,
                    moved.1 as i32,
                );
                let window = self.ctx.window_mut();
                window.set_margins(ml, mt);
                window.set_frame_size(size, false);
            }
            PressTarget::Background | PressTarget::Title(_) => {
                let (ml, mt) = origin.margins;
                self.ctx
                    .window_mut()
                    .set_margins(ml + moved.0 as i32, mt + moved.1 as i32);
            }
            PressTarget::Settings(_) | PressTarget::SettingsPanel | PressTarget::OutsideSettings => {}
        }
    }

    fn on_release(&mut self) {
        let Some((target, gesture)) = self.tracker.release() else {
            return;
        };
        self.press_origin = None;
        match gesture {
            Gesture::Tap { x, y } => {
                debug!("Tap at ({:.0}, {:.0}) on {:?}", x, y, target);
                self.on_tap(target);
            }
            Gesture::DragEnd => self.on_drag_end(target),
            _ => {}
        }
    }

    fn on_drag_end(&mut self, target: PressTarget) {
        match target {
            PressTarget::Image => self.ctx.end_drag(),
            PressTarget::Settings(SettingsControl::OpacitySlider) => {
                self.ctx.settings_mut().set_sliding(false);
                self.ctx.window_mut().request_redraw();
            }
            PressTarget::Resize(_) => {
                // Back to the high-quality path
                self.cpu_renderer.invalidate();
                self.ctx.window_mut().request_redraw();
            }
            _ => {}
        }
    }

    /// Pending field edits commit when focus moves elsewhere
    fn commit_unless_focused(&mut self, field: Option<SizeField>) {
        let focused = self.ctx.settings().focused();
        if focused.is_some() && focused != field {
            self.ctx.commit_size_field();
        }
    }

    fn on_tap(&mut self, target: PressTarget) {
        match target {
            PressTarget::Settings(control) => self.on_settings_tap(control),
            PressTarget::SettingsPanel => self.commit_unless_focused(None),
            PressTarget::OutsideSettings => {
                self.commit_unless_focused(None);
                self.ctx.close_settings();
            }
            PressTarget::Title(TitleControl::Close) => {
                info!("Close button pressed");
                self.should_exit = true;
            }
            PressTarget::Title(TitleControl::Settings) => self.ctx.toggle_settings(),
            PressTarget::Image => self.ctx.select_image(),
            PressTarget::Background => {
                // The placeholder covers the whole view
                if !self.ctx.viewport().has_image() {
                    self.ctx.select_image();
                }
            }
            PressTarget::Resize(_) => {}
        }
    }

    fn on_settings_tap(&mut self, control: SettingsControl) {
        let field = match control {
            SettingsControl::WidthField => Some(SizeField::Width),
            SettingsControl::HeightField => Some(SizeField::Height),
            _ => None,
        };
        self.commit_unless_focused(field);

        match control {
            SettingsControl::OpacitySlider => {
                self.ctx.settings_mut().set_sliding(false);
                self.ctx.window_mut().request_redraw();
            }
            SettingsControl::AlwaysOnTop => {
                let enabled = !self.ctx.always_on_top();
                self.ctx.toggle_always_on_top(enabled);
            }
            SettingsControl::ResetPosition => self.ctx.reset_transform_position(),
            SettingsControl::WidthField | SettingsControl::HeightField => {
                if let Some(field) = field {
                    if self.ctx.settings().focused() != Some(field) {
                        let current = self.window().frame_size();
                        self.ctx.settings_mut().begin_edit(field, current);
                        self.ctx.window_mut().request_redraw();
                    }
                }
            }
            SettingsControl::Close => self.ctx.close_settings(),
        }
    }

    fn on_scroll(&mut self, vertical: f64) {
        if vertical == 0.0 {
            return;
        }
        if self.modifiers.ctrl {
            let magnification = self.scroll_zoom.unwrap_or(1.0) * scroll_zoom_factor(vertical);
            self.scroll_zoom = Some(magnification);
            self.ctx.on_pinch(magnification);
        } else {
            self.ctx.adjust_opacity(scroll_opacity_delta(vertical));
        }
    }

    /// Keys typed into a focused size field
    fn on_field_key(&mut self, event: &KeyEvent) {
        let changed = match event.keysym {
            Keysym::Return | Keysym::KP_Enter => {
                self.ctx.commit_size_field();
                return;
            }
            Keysym::BackSpace => self.ctx.settings_mut().backspace(),
            Keysym::Escape => self.ctx.settings_mut().cancel_edit(),
            _ => match &event.utf8 {
                Some(text) => text
                    .chars()
                    .fold(false, |changed, c| self.ctx.settings_mut().push_char(c) || changed),
                None => false,
            },
        };
        if changed {
            self.ctx.window_mut().request_redraw();
        }
    }

    fn on_key(&mut self, event: &KeyEvent) {
        if self.ctx.settings().focused().is_some() {
            self.on_field_key(event);
            return;
        }

        match event.keysym {
            Keysym::Escape if self.ctx.settings().is_visible() => self.ctx.close_settings(),
            Keysym::Escape | Keysym::q => {
                info!("Exit key pressed");
                self.should_exit = true;
            }
            Keysym::s => self.ctx.toggle_settings(),
            Keysym::o => self.ctx.select_image(),
            Keysym::r => self.ctx.reset_transform_position(),
            Keysym::t => {
                let enabled = !self.ctx.always_on_top();
                self.ctx.toggle_always_on_top(enabled);
            }
            Keysym::plus | Keysym::equal | Keysym::KP_Add => self.ctx.adjust_opacity(OPACITY_STEP),
            Keysym::minus | Keysym::KP_Subtract => self.ctx.adjust_opacity(-OPACITY_STEP),
            _ => {}
        }
    }

    /// Create the wgpu renderer on first use; failure switches to the CPU path for good
    fn init_gpu_renderer(&mut self) {
        if self.gpu_initialized {
            return;
        }
        self.gpu_initialized = true;

        // With wayland-backend client_system, ObjectId.as_ptr() is the raw wl_proxy
        let surface_ptr = self.window().wl_surface().id().as_ptr() as *mut std::ffi::c_void;
        let display_ptr = self.display_ptr;

        if display_ptr.is_null() {
            warn!("Display pointer is null, falling back to CPU rendering");
            self.use_gpu = false;
            return;
        }

        let (width, height) = self.window().size.as_tuple();
        info!("Initializing GPU renderer at {}x{}", width, height);

        match WgpuRenderer::new(display_ptr, surface_ptr, width, height) {
            Ok(renderer) => {
                self.gpu_renderer = Some(renderer);
                info!("GPU renderer ready");
            }
            Err(e) => {
                warn!("Failed to initialize GPU renderer: {:?}", e);
                warn!("Drawing on the CPU from now on");
                self.use_gpu = false;
            }
        }
    }

    /// Draw the current state, on the GPU when nothing needs the CPU compositor
    fn draw(&mut self) {
        if !self.configured {
            return;
        }

        if self.use_gpu && !self.overlay_visible() {
            self.init_gpu_renderer();
            if self.draw_gpu() {
                return;
            }
            debug!("GPU frame skipped, drawing on CPU");
        }

        self.draw_cpu();
    }

    /// Draw using GPU (wgpu)
    fn draw_gpu(&mut self) -> bool {
        let Some(renderer) = self.gpu_renderer.as_mut() else {
            return false;
        };
        let viewport = self.ctx.viewport();
        let Some(image) = viewport.image() else {
            return false;
        };

        if self.gpu_generation != viewport.image_generation() {
            if let Err(e) = renderer.upload_texture(image) {
                warn!("Failed to upload texture to GPU: {:?}", e);
                self.use_gpu = false;
                return false;
            }
            self.gpu_generation = viewport.image_generation();
        }

        let (width, height) = self.ctx.window().size.as_tuple();
        renderer.resize(width, height);
        renderer.update_transform(&viewport.transform());

        match renderer.render() {
            Ok(true) => true,
            Ok(false) => false,
            Err(e) => {
                warn!("GPU render error: {:?}", e);
                false
            }
        }
    }

    /// Compose the full scene into an shm buffer
    fn draw_cpu(&mut self) {
        let size = self.window().size;
        let (width, height) = size.as_tuple();

        // ARGB8888, 4 bytes per pixel
        let stride = width as i32 * 4;
        let buffer_size = stride as usize * height as usize;
        if buffer_size > MAX_BUFFER_SIZE {
            error!("Buffer size too large: {} bytes, max: {} bytes", buffer_size, MAX_BUFFER_SIZE);
            return;
        }

        if self.pool.is_none() {
            match SlotPool::new(buffer_size, &self.shm) {
                Ok(pool) => self.pool = Some(pool),
                Err(e) => {
                    error!("Failed to create slot pool: {}. Buffer size: {} bytes", e, buffer_size);
                    return;
                }
            }
        }
        let Some(pool) = self.pool.as_mut() else {
            return;
        };

        if pool.len() < buffer_size {
            if let Err(e) = pool.resize(buffer_size) {
                error!("Failed to resize pool to {} bytes: {}", buffer_size, e);
                self.pool = None;
                return;
            }
        }

        let (buffer, canvas) =
            match pool.create_buffer(width as i32, height as i32, stride, wl_shm::Format::Argb8888) {
                Ok(buf) => buf,
                Err(e) => {
                    error!("Failed to create buffer {}x{}: {}", width, height, e);
                    return;
                }
            };

        let viewport = self.ctx.viewport();
        let settings = self.ctx.settings();
        let current = self.ctx.window().frame_size();
        let scene = Scene {
            size,
            image: viewport.image(),
            image_generation: viewport.image_generation(),
            transform: viewport.transform(),
            title: (self.hovered && self.ctx.chrome().show_controls).then_some(self.ctx.chrome().title),
            settings: settings.is_visible().then(|| SettingsView {
                opacity: viewport.transform().opacity,
                always_on_top: self.ctx.always_on_top(),
                width_text: settings.field_text(SizeField::Width, current),
                height_text: settings.field_text(SizeField::Height, current),
                focused: settings.focused(),
            }),
            fast: self.tracker.is_dragging() || viewport.is_pinching() || self.ctx.window().is_animating(),
        };
        self.cpu_renderer.render(canvas, &scene);

        let surface = self.ctx.window().wl_surface();
        if let Err(e) = buffer.attach_to(surface) {
            error!("Failed to attach buffer: {}", e);
            return;
        }
        surface.damage_buffer(0, 0, width as i32, height as i32);
        surface.commit();

        self.buffer = Some(buffer);
    }
}

// smithay-client-toolkit handlers

impl CompositorHandler for WaylandApp {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
        debug!("Scale factor changed");
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
        debug!("Transform changed");
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
        if !self.ctx.window_mut().step_animation(Instant::now()) {
            // Last step lands on the target; render it properly
            self.cpu_renderer.invalidate();
        }
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for WaylandApp {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("Output added");
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("Output updated");
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
        debug!("Output destroyed");
    }
}

impl LayerShellHandler for WaylandApp {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface) {
        info!("Layer surface closed");
        self.should_exit = true;
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        debug!("Layer surface configured: {:?}", configure);

        // While the user or an animation is sizing the window, keep our own size
        let manipulating = self.tracker.target().is_some() || self.window().is_animating();
        let (new_w, new_h) = configure.new_size;
        if !manipulating && new_w > 0 && new_h > 0 {
            let suggested = WindowGeometry::new(new_w, new_h);
            if suggested != self.window().size {
                self.ctx.window_mut().size = suggested;
            }
        }

        self.configured = true;
        self.ctx.window_mut().request_redraw();
    }
}

impl SeatHandler for WaylandApp {
    fn seat_state(&mut self) -> &mut SeatState {
        &mut self.seat_state
    }

    fn new_seat(&mut self, _conn: &Connection, qh: &QueueHandle<Self>, seat: wl_seat::WlSeat) {
        debug!("New seat");
        self.ensure_data_device(qh, &seat);
    }

    fn new_capability(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        seat: wl_seat::WlSeat,
        capability: Capability,
    ) {
        debug!("New capability: {:?}", capability);
        self.ensure_data_device(qh, &seat);

        if capability == Capability::Keyboard {
            if let Err(e) = self.seat_state.get_keyboard(qh, &seat, None) {
                error!("Failed to get keyboard: {}", e);
            }
        }
        if capability == Capability::Pointer {
            match self.seat_state.get_pointer(qh, &seat) {
                Ok(pointer) => {
                    if let Some(gestures) = &self.pointer_gestures {
                        self.pinch = Some(gestures.get_pinch_gesture(&pointer, qh, ()));
                    }
                }
                Err(e) => error!("Failed to get pointer: {}", e),
            }
        }
    }

    fn remove_capability(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _seat: wl_seat::WlSeat,
        capability: Capability,
    ) {
        debug!("Capability removed");
        if capability == Capability::Pointer {
            if let Some(pinch) = self.pinch.take() {
                // destroy only exists from version 2
                if pinch.version() >= 2 {
                    pinch.destroy();
                }
            }
        }
    }

    fn remove_seat(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _seat: wl_seat::WlSeat) {
        debug!("Seat removed");
    }
}

impl KeyboardHandler for WaylandApp {
    fn enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _surface: &wl_surface::WlSurface,
        _serial: u32,
        _raw: &[u32],
        _keysyms: &[Keysym],
    ) {
        debug!("Keyboard entered surface");
    }

    fn leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _surface: &wl_surface::WlSurface,
        _serial: u32,
    ) {
        debug!("Keyboard left surface");
    }

    fn press_key(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        event: KeyEvent,
    ) {
        debug!("Key pressed: {:?}", event.keysym);
        self.on_key(&event);
    }

    fn release_key(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        _event: KeyEvent,
    ) {
    }

    fn update_modifiers(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _keyboard: &wl_keyboard::WlKeyboard,
        _serial: u32,
        modifiers: Modifiers,
        _layout: u32,
    ) {
        self.modifiers = modifiers;
        if !modifiers.ctrl {
            self.end_scroll_zoom();
        }
    }
}

impl PointerHandler for WaylandApp {
    fn pointer_frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _pointer: &wl_pointer::WlPointer,
        events: &[PointerEvent],
    ) {
        for event in events {
            match event.kind {
                PointerEventKind::Enter { .. } => {
                    debug!("Pointer entered");
                    self.hovered = true;
                    self.pointer_pos = event.position;
                    self.ctx.window_mut().request_redraw();
                }
                PointerEventKind::Leave { .. } => {
                    debug!("Pointer left");
                    self.hovered = false;
                    if let Some((target, _)) = self.tracker.cancel() {
                        self.on_drag_end(target);
                    }
                    self.press_origin = None;
                    self.end_scroll_zoom();
                    self.ctx.window_mut().request_redraw();
                }
                PointerEventKind::Motion { .. } => {
                    let (x, y) = event.position;
                    self.pointer_pos = (x, y);
                    self.on_motion(x, y);
                }
                PointerEventKind::Press { button, .. } => {
                    debug!("Pointer button pressed: {}", button);
                    if button == BTN_LEFT {
                        let (x, y) = self.pointer_pos;
                        self.on_press(x, y);
                    }
                }
                PointerEventKind::Release { button, .. } => {
                    if button == BTN_LEFT {
                        self.on_release();
                    }
                }
                PointerEventKind::Axis { vertical, .. } => {
                    self.on_scroll(vertical.absolute);
                }
            }
        }
    }
}

impl Dispatch<ZwpPointerGesturesV1, ()> for WaylandApp {
    fn event(
        _state: &mut Self,
        _proxy: &ZwpPointerGesturesV1,
        _event: <ZwpPointerGesturesV1 as Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwpPointerGesturePinchV1, ()> for WaylandApp {
    fn event(
        state: &mut Self,
        _proxy: &ZwpPointerGesturePinchV1,
        event: zwp_pointer_gesture_pinch_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwp_pointer_gesture_pinch_v1::Event::Begin { fingers, .. } => {
                debug!("Pinch started with {} fingers", fingers);
            }
            // `scale` is relative to the start of the gesture
            zwp_pointer_gesture_pinch_v1::Event::Update { scale, .. } => {
                state.ctx.on_pinch(scale);
            }
            zwp_pointer_gesture_pinch_v1::Event::End { cancelled, .. } => {
                debug!("Pinch ended (cancelled: {})", cancelled);
                state.ctx.end_pinch();
                state.cpu_renderer.invalidate();
                state.ctx.window_mut().request_redraw();
            }
            _ => {}
        }
    }
}

impl DataDeviceHandler for WaylandApp {
    fn enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        data_device: &WlDataDevice,
        _x: f64,
        _y: f64,
        _wl_surface: &wl_surface::WlSurface,
    ) {
        let Some(offer) = drag_offer(data_device) else {
            return;
        };
        self.drag_accepted = offer.with_mime_types(|types| types.iter().any(|t| t == URI_LIST_MIME));
        self.drag_action = DndAction::empty();
        debug!("Drag entered (uri-list offered: {})", self.drag_accepted);

        if self.drag_accepted {
            offer.accept_mime_type(offer.serial, Some(URI_LIST_MIME.to_string()));
            if self.drag_source_actions.contains(DndAction::Copy) {
                offer.set_actions(DndAction::Copy, DndAction::Copy);
            }
        } else {
            offer.accept_mime_type(offer.serial, None);
        }
    }

    fn leave(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _data_device: &WlDataDevice) {
        debug!("Drag left");
        self.drag_accepted = false;
        self.drag_source_actions = DndAction::empty();
        self.drag_action = DndAction::empty();
    }

    fn motion(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _data_device: &WlDataDevice,
        _x: f64,
        _y: f64,
    ) {
    }

    fn selection(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _data_device: &WlDataDevice) {}

    fn drop_performed(
        &mut self,
        conn: &Connection,
        _qh: &QueueHandle<Self>,
        data_device: &WlDataDevice,
    ) {
        let Some(offer) = drag_offer(data_device) else {
            return;
        };

        let accepted = std::mem::take(&mut self.drag_accepted);
        let action = std::mem::replace(&mut self.drag_action, DndAction::empty());
        self.drag_source_actions = DndAction::empty();
        if can_finish_drop(accepted, action) {
            match offer.receive(URI_LIST_MIME.to_string()) {
                Ok(pipe) => {
                    // The source only writes once our receive request is out
                    if let Err(e) = conn.flush() {
                        warn!("Failed to flush Wayland connection: {}", e);
                    }
                    let deliver = self.deliver_to_loop();
                    self.ctx.drop_image(DropPayload::UriList(Box::new(pipe)), deliver);
                }
                Err(e) => debug!("Failed to receive dropped data: {}", e),
            }
            offer.finish();
        } else {
            debug!("Ignoring drop (uri-list: {}, action: {:?})", accepted, action);
        }
        offer.destroy();
    }
}

/// Finishing is only legal once copy was negotiated, and only worth it for a uri-list
fn can_finish_drop(uri_list_accepted: bool, action: DndAction) -> bool {
    uri_list_accepted && action == DndAction::Copy
}

fn drag_offer(data_device: &WlDataDevice) -> Option<DragOffer> {
    data_device
        .data::<DataDeviceData>()
        .and_then(|data| data.drag_offer())
}

impl DataOfferHandler for WaylandApp {
    fn source_actions(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        offer: &mut DragOffer,
        actions: DndAction,
    ) {
        self.drag_source_actions = actions;
        if self.drag_accepted && actions.contains(DndAction::Copy) {
            offer.set_actions(DndAction::Copy, DndAction::Copy);
        }
    }

    fn selected_action(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _offer: &mut DragOffer,
        actions: DndAction,
    ) {
        debug!("Compositor selected drop action {:?}", actions);
        self.drag_action = actions;
    }
}

// We never offer data ourselves
impl DataSourceHandler for WaylandApp {
    fn accept_mime(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _source: &WlDataSource,
        _mime: Option<String>,
    ) {
    }

    fn send_request(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _source: &WlDataSource,
        _mime: String,
        _fd: WritePipe,
    ) {
    }

    fn cancelled(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _source: &WlDataSource) {}

    fn dnd_dropped(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _source: &WlDataSource) {}

    fn dnd_finished(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _source: &WlDataSource) {}

    fn action(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _source: &WlDataSource,
        _action: DndAction,
    ) {
    }
}

impl ShmHandler for WaylandApp {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm
    }
}

impl ProvidesRegistryState for WaylandApp {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState, SeatState];
}

// Delegate macros
delegate_compositor!(WaylandApp);
delegate_output!(WaylandApp);
delegate_layer!(WaylandApp);
delegate_seat!(WaylandApp);
delegate_keyboard!(WaylandApp);
delegate_pointer!(WaylandApp);
delegate_shm!(WaylandApp);
delegate_data_device!(WaylandApp);
delegate_registry!(WaylandApp);

/// Startup configuration of the window
#[derive(Debug)]
pub struct RunOptions {
    pub image: Option<ImageData>,
    pub launch: LaunchOptions,
    /// Requested size; missing axes come from the image or the default
    pub size: (Option<u32>, Option<u32>),
    pub use_gpu: bool,
}

/// Window size at launch: explicit axes win, then the image limited to a share
/// of the screen, then the default
fn initial_size(
    requested: (Option<u32>, Option<u32>),
    image: Option<(u32, u32)>,
    display: (u32, u32),
) -> WindowGeometry {
    let (auto_w, auto_h) = image.map_or((DEFAULT_SIZE, DEFAULT_SIZE), |(w, h)| {
        calculate_limited_size(w, h, display.0, display.1, INITIAL_SCREEN_FRACTION)
    });
    WindowGeometry::new(requested.0.unwrap_or(auto_w), requested.1.unwrap_or(auto_h))
}

/// Run the Wayland application
pub fn run(options: RunOptions) -> Result<()> {
    info!("Connecting to the Wayland compositor");

    let conn = Connection::connect_to_env().context("Failed to connect to Wayland display")?;

    let (globals, mut event_queue) =
        registry_queue_init(&conn).context("Failed to initialize registry")?;
    let qh = event_queue.handle();

    // Required globals
    let compositor_state =
        CompositorState::bind(&globals, &qh).context("Failed to bind compositor")?;
    let layer_shell = LayerShell::bind(&globals, &qh).context("Failed to bind layer shell")?;
    let shm = Shm::bind(&globals, &qh).context("Failed to bind shm")?;

    // Optional globals: the window still works without drops or pinch
    let data_device_manager = DataDeviceManagerState::bind(&globals, &qh)
        .map_err(|e| warn!("Drag and drop unavailable: {}", e))
        .ok();
    let pointer_gestures = globals
        .bind::<ZwpPointerGesturesV1, _, _>(&qh, 1..=3, ())
        .map_err(|e| info!("Pinch gestures unavailable: {}", e))
        .ok();

    // Raw wl_display for the wgpu surface
    let display_ptr = conn.backend().display_ptr() as *mut std::ffi::c_void;

    let output_state = OutputState::new(&globals, &qh);
    let registry_state = RegistryState::new(&globals);
    let seat_state = SeatState::new(&globals, &qh);

    let mut event_loop: EventLoop<WaylandApp> =
        EventLoop::try_new().context("Failed to create event loop")?;

    // Decoded drops come back to this thread through the loop
    let (drop_sender, drop_receiver) = channel::channel::<DecodeOutcome>();
    event_loop
        .handle()
        .insert_source(drop_receiver, |event, _, app| {
            if let channel::Event::Msg(outcome) = event {
                app.ctx.complete_drop(outcome);
            }
        })
        .map_err(|e| anyhow!("Failed to register drop channel: {}", e.error))?;

    // Create the layer surface
    let level = WindowLevel::from_always_on_top(options.launch.always_on_top);
    let surface = compositor_state.create_surface(&qh);
    let layer_surface =
        layer_shell.create_layer_surface(&qh, surface, layer_for(level), Some("imagefloat"), None);

    let window = LayerWindow::new(
        layer_surface,
        conn.clone(),
        qh.clone(),
        WindowGeometry::new(DEFAULT_SIZE, DEFAULT_SIZE),
        (0, 0),
        level,
    );

    let mut app = WaylandApp {
        registry_state,
        seat_state,
        output_state,
        shm,
        data_device_manager,
        data_device: None,
        drag_accepted: false,
        drag_source_actions: DndAction::empty(),
        drag_action: DndAction::empty(),
        pointer_gestures,
        pinch: None,
        display_ptr,
        ctx: AppContext::new(window, RfdPicker, options.launch),
        drop_sender,
        should_exit: false,
        pool: None,
        buffer: None,
        configured: false,
        cpu_renderer: CpuRenderer::new(),
        pointer_pos: (0.0, 0.0),
        hovered: false,
        modifiers: Modifiers::default(),
        tracker: PointerTracker::default(),
        press_origin: None,
        scroll_zoom: None,
        use_gpu: options.use_gpu,
        gpu_renderer: None,
        gpu_initialized: false,
        gpu_generation: 0,
    };

    // Output modes arrive with the first roundtrip
    event_queue.roundtrip(&mut app)?;

    let (display_width, display_height) = get_display_dimensions(&app.output_state);
    info!("Display dimensions: {}x{}", display_width, display_height);

    let image_size = options.image.as_ref().map(|image| (image.width, image.height));
    let size = initial_size(options.size, image_size, (display_width, display_height));
    info!("Window size: {}x{}", size.width, size.height);

    // Start centered
    {
        let window = app.ctx.window_mut();
        window.size = size;
        window.margin_left = (display_width as i32 - size.width as i32) / 2;
        window.margin_top = (display_height as i32 - size.height as i32) / 2;
    }
    if let Some(image) = options.image {
        app.ctx.show_image(image);
    }

    // Chrome, level and the first commit that triggers configure
    app.ctx.launch();

    WaylandSource::new(conn.clone(), event_queue)
        .insert(event_loop.handle())
        .map_err(|e| anyhow!("Failed to insert Wayland source: {}", e.error))?;

    info!("Starting event loop");
    info!("Controls: Tap to open an image, drop files onto the window, drag to pan");
    info!("Scroll for opacity, Ctrl+scroll or pinch to zoom, S for settings, Esc to close");

    // Main event loop
    loop {
        event_loop
            .dispatch(None, &mut app)
            .context("Event loop dispatch failed")?;

        if app.should_exit {
            info!("Exiting application");
            break;
        }

        if app.ctx.window_mut().take_redraw() {
            app.draw();
            if let Err(e) = conn.flush() {
                warn!("Failed to flush Wayland connection: {}", e);
            }
        }
    }

    app.ctx.cancel_drop();
    Ok(())
}

/// Size of the first output's current mode
fn get_display_dimensions(output_state: &OutputState) -> (u32, u32) {
    for output in output_state.outputs() {
        if let Some(info) = output_state.info(&output) {
            if let Some(mode) = info.modes.iter().find(|m| m.current) {
                return (mode.dimensions.0 as u32, mode.dimensions.1 as u32);
            }
            if let Some(mode) = info.modes.first() {
                return (mode.dimensions.0 as u32, mode.dimensions.1 as u32);
            }
        }
    }
    (1920, 1080)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::tests::solid_image;
    use crate::viewport::GestureMode;
    use crate::window::{MAX_SIZE, MIN_SIZE};

    fn viewport_with_image() -> Viewport {
        let mut viewport = Viewport::new(0.7, GestureMode::Absolute);
        viewport.replace_image(solid_image(100, 100));
        viewport
    }

    #[test]
    fn settings_panel_is_modal() {
        let view = WindowGeometry::new(400, 400);
        let viewport = viewport_with_image();
        let layout = SettingsLayout::new(view);
        let (cx, cy) = layout.close.center();

        assert_eq!(
            resolve_press(view, true, true, &viewport, cx, cy),
            PressTarget::Settings(SettingsControl::Close)
        );
        // Centre of the image, but below the panel
        assert_eq!(
            resolve_press(view, true, true, &viewport, 200.0, 390.0),
            PressTarget::OutsideSettings
        );
    }

    #[test]
    fn press_order_without_settings() {
        let view = WindowGeometry::new(400, 400);
        let viewport = viewport_with_image();
        let title = TitleBarLayout::new(view);
        let (cx, cy) = title.close.center();

        assert_eq!(
            resolve_press(view, false, true, &viewport, cx, cy),
            PressTarget::Title(TitleControl::Close)
        );
        // Controls hidden: the corner is a resize edge instead
        assert_eq!(
            resolve_press(view, false, false, &viewport, 398.0, 2.0),
            PressTarget::Resize(ResizeEdge::TopRight)
        );
        assert_eq!(
            resolve_press(view, false, true, &viewport, 200.0, 200.0),
            PressTarget::Image
        );
    }

    #[test]
    fn empty_view_presses_background() {
        let view = WindowGeometry::new(400, 400);
        let viewport = Viewport::new(0.7, GestureMode::Absolute);
        assert_eq!(
            resolve_press(view, false, false, &viewport, 200.0, 200.0),
            PressTarget::Background
        );
    }

    #[test]
    fn zoomed_out_image_leaves_background() {
        let view = WindowGeometry::new(400, 400);
        let mut viewport = viewport_with_image();
        viewport.on_pinch(0.5);
        assert_eq!(
            resolve_press(view, false, false, &viewport, 50.0, 200.0),
            PressTarget::Background
        );
    }

    #[test]
    fn drop_finishes_only_after_copy() {
        assert!(can_finish_drop(true, DndAction::Copy));
        assert!(!can_finish_drop(true, DndAction::Move));
        assert!(!can_finish_drop(true, DndAction::empty()));
        assert!(!can_finish_drop(false, DndAction::Copy));
    }

    #[test]
    fn initial_size_prefers_explicit_axes() {
        let display = (1920, 1080);
        assert_eq!(
            initial_size((None, None), None, display),
            WindowGeometry::new(DEFAULT_SIZE, DEFAULT_SIZE)
        );
        assert_eq!(
            initial_size((Some(640), None), Some((800, 600)), display),
            WindowGeometry::new(640, 600)
        );
        assert_eq!(
            initial_size((Some(10), Some(99_999)), None, display),
            WindowGeometry::new(MIN_SIZE, MAX_SIZE)
        );
    }

    #[test]
    fn large_image_is_limited_to_screen_share() {
        let size = initial_size((None, None), Some((8000, 4000)), (1920, 1080));
        assert!(size.width < 1920 && size.height < 1080);
        assert!(size.width >= MIN_SIZE && size.height >= MIN_SIZE);
    }

    #[test]
    fn normal_level_sits_below_windows() {
        assert_eq!(layer_for(WindowLevel::Floating), Layer::Overlay);
        assert_eq!(layer_for(WindowLevel::Normal), Layer::Bottom);
    }
}
