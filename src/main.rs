// =============================================================================
// HAMMOCK EDITOR - GPU context and presentation driver
// =============================================================================
//
// Thin editor shell around the backend: opens a window, builds the GPU
// context and swapchain, and clears the screen every frame. With
// `window.headless` set it builds the context without a surface, reports the
// queue layout and exits.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop                                               │
// │    └── Instance + Surface (window connection)                   │
// │          └── Context (device, queues, command pools)            │
// │                └── SwapchainManager (images + views)            │
// │                      └── Frame sync (fences, semaphores)        │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the frame that last used this sync slot
// 2. Acquire swapchain image, then re-arm the slot's fence
// 3. Submit the pre-recorded clear for that image
// 4. Present, recreating the swapchain when the surface changed
//
// =============================================================================

use anyhow::{Context as _, Result};
use ash::vk;
use hammock::backend::{
    loader, AshPresentation, Context, FrameSync, GpuError, Instance, QueueRole, Surface,
    SwapchainManager,
};
use hammock::config::Config;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config)?;
    log::info!("Starting {}", config.window.title);

    loader::init().context("Vulkan is not available on this system")?;

    let result = if config.window.headless {
        run_headless(&config)
    } else {
        run_windowed(config)
    };

    // Every instance is gone by now
    loader::shutdown();
    result
}

/// Initialize logging, optionally into a fresh log file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};

    let mut builder = Builder::from_default_env();
    builder.filter_level(config.log_level());

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {:?}", config.debug.log_file))?;
        writeln!(file, "=== Hammock Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn enable_validation(config: &Config) -> bool {
    cfg!(debug_assertions) && config.debug.validation_layers
}

// =============================================================================
// HEADLESS MODE
// =============================================================================

/// Build a surface-less context and report what it got.
fn run_headless(config: &Config) -> Result<()> {
    let instance = Instance::new(&config.window.title, enable_validation(config), None)?;
    let context = Context::new(instance, None).context("Failed to create headless GPU context")?;

    log::info!("Queue roles: {}", context.queue_roles());
    for role in QueueRole::ALL {
        match context.queue(role) {
            Some(queue) => log::info!("  {} queue: {:?}", role, queue),
            None => log::info!("  {} queue: none", role),
        }
    }
    log::info!(
        "synchronization2: {}",
        if context.extensions().synchronization2 { "enabled" } else { "unavailable" }
    );

    context.wait_idle()?;
    Ok(())
}

// =============================================================================
// WINDOWED MODE
// =============================================================================

fn run_windowed(config: Config) -> Result<()> {
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("VSync: {}", if config.graphics.vsync { "on" } else { "off" });

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Everything tied to the window's surface.
///
/// IMPORTANT: Field order matters for Drop! After `Drop::drop` releases the
/// frame objects, the fields drop top to bottom: swapchain, context (pools,
/// device), surface, instance.
struct GpuState {
    /// Sync objects for each frame in flight
    frame_sync: Vec<FrameSync>,
    /// One command buffer per swapchain image (pre-recorded)
    command_buffers: Vec<vk::CommandBuffer>,
    swapchain: SwapchainManager<AshPresentation>,
    context: Context,
    surface: Surface,
    instance: Arc<Instance>,

    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Which sync slot we're currently using
    current_frame: usize,
    wait_stages: [vk::PipelineStageFlags; 1],

    /// Set when the window or surface changed - triggers swapchain recreation
    needs_resize: bool,
    /// Set when the window is minimized (size = 0) - skip rendering
    is_minimized: bool,
}

impl GpuState {
    /// window -> instance -> surface -> context -> swapchain
    fn new(config: &Config, window: &Window) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let display = window.raw_display_handle();
        let instance = Instance::new(&config.window.title, enable_validation(config), Some(display))?;

        let surface = unsafe {
            Surface::from_raw_handles(instance.clone(), display, window.raw_window_handle())
        }?;

        let context = Context::new(instance.clone(), Some(surface.handle()))?;
        let graphics_queue = context
            .queue(QueueRole::Graphics)
            .context("GPU context has no graphics queue")?;
        let present_queue = context
            .queue(QueueRole::Present)
            .context("GPU can't present to this window")?;

        let swapchain = SwapchainManager::new(unsafe { context.presentation() });

        let mut gpu = Self {
            frame_sync: Vec::new(),
            command_buffers: Vec::new(),
            swapchain,
            context,
            surface,
            instance,
            graphics_queue,
            present_queue,
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::TRANSFER],
            needs_resize: false,
            is_minimized: false,
        };

        // These don't need to be recreated on resize
        gpu.frame_sync =
            unsafe { FrameSync::create_frames(gpu.context.device(), config.frames_in_flight()) }?;

        gpu.rebuild_swapchain(window.inner_size(), config)?;

        log::info!(
            "Vulkan initialized successfully (validation {})",
            if gpu.instance.validation_enabled() { "on" } else { "off" }
        );
        Ok(gpu)
    }

    /// (Re)create the swapchain for `size` and re-record the clear commands.
    fn rebuild_swapchain(&mut self, size: PhysicalSize<u32>, config: &Config) -> Result<()> {
        // Don't create swapchain if window is minimized (size = 0)
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // Nothing may still be reading the old images
        self.context.wait_idle()?;

        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        self.swapchain
            .create(self.surface.handle(), extent, config.graphics.vsync)?;

        self.free_command_buffers();
        let pool = self
            .context
            .command_pool(QueueRole::Graphics)
            .context("Graphics command pool missing")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(self.swapchain.images().len() as u32);
        let command_buffers = unsafe { self.context.device().allocate_command_buffers(&alloc_info) }?;

        let clear_color = vk::ClearColorValue {
            float32: config.graphics.clear_color,
        };
        for (&cmd, &image) in command_buffers.iter().zip(self.swapchain.images()) {
            unsafe { record_clear(self.context.device(), cmd, image, &clear_color) }?;
        }

        log::info!("Created {} pre-recorded command buffers", command_buffers.len());
        self.command_buffers = command_buffers;
        self.needs_resize = false;
        Ok(())
    }

    fn free_command_buffers(&mut self) {
        if self.command_buffers.is_empty() {
            return;
        }
        if let Some(pool) = self.context.command_pool(QueueRole::Graphics) {
            unsafe {
                self.context
                    .device()
                    .free_command_buffers(pool, &self.command_buffers)
            };
        }
        self.command_buffers.clear();
    }

    /// Render a single frame. Returns false when nothing was drawn.
    fn render_frame(&mut self, size: PhysicalSize<u32>, config: &Config) -> Result<bool> {
        // Handle resize if needed
        if self.needs_resize {
            self.rebuild_swapchain(size, config)?;
        }
        // Skip rendering if minimized
        if self.is_minimized {
            return Ok(false);
        }

        let sync = self.frame_sync[self.current_frame];
        let device = self.context.device();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait for previous frame using this sync slot
        // ─────────────────────────────────────────────────────────────────────
        unsafe { sync.wait(device) }?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let acquired = match self.swapchain.acquire_next_image(sync.image_available) {
            Ok(acquired) => acquired,
            Err(e) if e.is_out_of_date() || matches!(e, GpuError::SwapchainUninitialized) => {
                self.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        // Suboptimal means swapchain still works but should be recreated
        if acquired.suboptimal {
            self.needs_resize = true;
        }

        let cmd = match self.command_buffers.get(acquired.index as usize) {
            Some(&cmd) => cmd,
            None => anyhow::bail!("No command buffer for swapchain image {}", acquired.index),
        };

        // Fence stays signalled on the early returns above
        unsafe { sync.reset(device) }?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Submit command buffer
        // ─────────────────────────────────────────────────────────────────────
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence, // Signal this fence when GPU is done
            )
        }?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present the image
        // ─────────────────────────────────────────────────────────────────────
        match self
            .swapchain
            .present(self.present_queue, acquired.index, &signal_semaphores)
        {
            Ok(recreate) => {
                if recreate {
                    self.needs_resize = true;
                }
            }
            Err(e) => {
                log::warn!("{}", e);
                self.needs_resize = true;
            }
        }

        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();
        Ok(true)
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        if let Err(e) = self.context.wait_idle() {
            log::warn!("wait_idle before cleanup failed: {}", e);
        }

        // 1. Sync objects
        for sync in &mut self.frame_sync {
            unsafe { sync.destroy(self.context.device()) };
        }

        // 2. Command buffers
        self.free_command_buffers();

        // 3. Swapchain, context, surface, instance drop as fields
    }
}

/// Record a full-image clear for `image`, leaving it ready to present.
unsafe fn record_clear(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    clear_color: &vk::ClearColorValue,
) -> Result<(), vk::Result> {
    // Which parts of the image to affect (all of it)
    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    let begin_info = vk::CommandBufferBeginInfo::builder();
    device.begin_command_buffer(cmd, &begin_info)?;

    // UNDEFINED -> TRANSFER_DST, old contents are discarded
    let barrier_to_transfer = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier_to_transfer],
    );

    device.cmd_clear_color_image(
        cmd,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        clear_color,
        &[subresource_range],
    );

    // TRANSFER_DST -> PRESENT_SRC
    let barrier_to_present = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::empty())
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier_to_present],
    );

    device.end_command_buffer(cmd)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    // Dropped before the window: the surface must go first
    gpu: Option<GpuState>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            gpu: None,
            window: None,
            is_fullscreen,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn render_frame(&mut self) -> Result<bool> {
        match (self.window.as_ref(), self.gpu.as_mut()) {
            (Some(window), Some(gpu)) => gpu.render_frame(window.inner_size(), &self.config),
            _ => Ok(false),
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(gpu) = self.gpu.as_mut() {
                gpu.needs_resize = true;
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match GpuState::new(&self.config, &window) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref gpu) = self.gpu {
                    if let Err(e) = gpu.context.wait_idle() {
                        log::warn!("wait_idle on close failed: {}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(gpu) = self.gpu.as_mut() {
                    if size.width == 0 || size.height == 0 {
                        gpu.is_minimized = true;
                    } else {
                        gpu.is_minimized = false;
                        gpu.needs_resize = true;
                    }
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => log::error!("Render error: {:?}", e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
