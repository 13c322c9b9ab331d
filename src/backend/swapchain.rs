// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// `create` doubles as the resize path: the previous chain is handed to the
// driver as `old_swapchain` and only torn down once its replacement exists,
// so a failed recreation leaves the old chain live.

use ash::prelude::VkResult;
use ash::vk;

use super::error::{GpuError, Result};
use super::surface::SurfaceDescriptor;

/// `current_extent.width` value meaning "the swapchain decides the size".
pub const SURFACE_DEFINED_EXTENT: u32 = u32::MAX;

/// Surface formats we prefer, best first.
pub const PREFERRED_FORMATS: [vk::Format; 3] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::A8B8G8R8_SRGB_PACK32,
];

const COMPOSITE_ALPHA_ORDER: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Use the caller's size only when the surface leaves it up to us.
pub fn resolve_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width == SURFACE_DEFINED_EXTENT {
        requested
    } else {
        capabilities.current_extent
    }
}

/// FIFO with vsync. Without it: mailbox, then immediate, then FIFO, which
/// every surface supports.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    let mut mode = vk::PresentModeKHR::FIFO;
    for &candidate in available {
        if candidate == vk::PresentModeKHR::MAILBOX {
            return candidate;
        }
        if candidate == vk::PresentModeKHR::IMMEDIATE {
            mode = candidate;
        }
    }
    mode
}

/// One more than the minimum, capped by the maximum (0 = no maximum).
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

pub fn select_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

pub fn select_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    COMPOSITE_ALPHA_ORDER
        .into_iter()
        .find(|&mode| capabilities.supported_composite_alpha.contains(mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// First preferred format the surface offers, else whatever it lists first.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    PREFERRED_FORMATS
        .iter()
        .find_map(|&preferred| available.iter().find(|f| f.format == preferred))
        .or_else(|| available.first())
        .copied()
}

/// Parameters for one swapchain (re)creation, resolved from a fresh surface
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainSettings {
    pub fn resolve(
        surface: &SurfaceDescriptor,
        requested_extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<Self> {
        let caps = &surface.capabilities;
        let surface_format =
            select_surface_format(&surface.formats).ok_or(GpuError::SurfaceQuery {
                query: "formats",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            })?;

        Ok(Self {
            surface_format,
            present_mode: select_present_mode(&surface.present_modes, vsync),
            extent: resolve_extent(caps, requested_extent),
            image_count: select_image_count(caps),
            pre_transform: select_pre_transform(caps),
            composite_alpha: select_composite_alpha(caps),
        })
    }
}

/// The driver calls the swapchain manager makes. Implemented over ash for real
/// use; tests swap in an in-memory driver.
pub trait PresentationDriver {
    fn surface_descriptor(&self, surface: vk::SurfaceKHR) -> Result<SurfaceDescriptor>;
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR) -> VkResult<bool>;
}

/// Presentation driver backed by a live device.
///
/// Holds copies of the device's function tables, not ownership: it must be
/// dropped before the device is destroyed.
pub struct AshPresentation {
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) surface_loader: ash::extensions::khr::Surface,
    pub(crate) swapchain_loader: ash::extensions::khr::Swapchain,
}

impl PresentationDriver for AshPresentation {
    fn surface_descriptor(&self, surface: vk::SurfaceKHR) -> Result<SurfaceDescriptor> {
        unsafe { SurfaceDescriptor::query(&self.surface_loader, self.physical_device, surface) }
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR) -> VkResult<bool> {
        unsafe { self.swapchain_loader.queue_present(queue, info) }
    }
}

/// A live swapchain. `images[i]` is viewed by `views[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The image is usable but the chain no longer matches the surface.
    pub suboptimal: bool,
}

/// Owns the presentation image chain and its views.
///
/// Uninitialized until the first successful `create`; `destroy` returns it
/// there. Not thread safe: all calls belong on the thread that owns the
/// surface, and the caller must have drained GPU work against the old images
/// before recreating.
pub struct SwapchainManager<D: PresentationDriver> {
    driver: D,
    state: Option<SwapchainState>,
}

impl<D: PresentationDriver> SwapchainManager<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: None,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn state(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.state.is_some()
    }

    pub fn images(&self) -> &[vk::Image] {
        self.state.as_ref().map_or(&[], |s| s.images.as_slice())
    }

    pub fn views(&self) -> &[vk::ImageView] {
        self.state.as_ref().map_or(&[], |s| s.views.as_slice())
    }

    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.state.as_ref().map(|s| s.surface_format)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.state.as_ref().map(|s| s.extent)
    }

    /// Build (or rebuild) the swapchain for `surface`.
    ///
    /// On error before the new swapchain exists, the previous chain is left
    /// exactly as it was. If fetching images or building views fails after
    /// that point, the half-built chain is released and the manager is
    /// uninitialized.
    pub fn create(
        &mut self,
        surface: vk::SurfaceKHR,
        requested_extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<()> {
        let descriptor = self.driver.surface_descriptor(surface)?;
        let settings = SwapchainSettings::resolve(&descriptor, requested_extent, vsync)?;

        let old_swapchain = self
            .state
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.handle);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(settings.image_count)
            .image_format(settings.surface_format.format)
            .image_color_space(settings.surface_format.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(settings.pre_transform)
            .composite_alpha(settings.composite_alpha)
            .present_mode(settings.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = self
            .driver
            .create_swapchain(&create_info)
            .map_err(GpuError::SwapchainCreation)?;

        // The replacement exists, so the retired chain can go
        if let Some(old) = self.state.take() {
            self.release(&old.views, old.handle);
            log::debug!("Destroyed previous swapchain ({} views)", old.views.len());
        }

        let images = match self.driver.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(result) => {
                self.driver.destroy_swapchain(swapchain);
                return Err(GpuError::SwapchainCreation(result));
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for (index, &image) in images.iter().enumerate() {
            match self.driver.create_image_view(&color_view_info(image, settings.surface_format.format)) {
                Ok(view) => views.push(view),
                Err(result) => {
                    self.release(&views, swapchain);
                    return Err(GpuError::ImageView { index, result });
                }
            }
        }

        log::info!(
            "Created swapchain {}x{} with {} images ({:?}, {:?})",
            settings.extent.width,
            settings.extent.height,
            images.len(),
            settings.present_mode,
            settings.surface_format.format
        );

        self.state = Some(SwapchainState {
            handle: swapchain,
            surface_format: settings.surface_format,
            present_mode: settings.present_mode,
            extent: settings.extent,
            images,
            views,
        });
        Ok(())
    }

    /// Wait (without timeout) for the next presentable image.
    ///
    /// Out-of-date and lost surfaces come back as `GpuError::Acquire`; the
    /// caller decides whether to run `create` again.
    pub fn acquire_next_image(&self, signal_semaphore: vk::Semaphore) -> Result<AcquiredImage> {
        let state = self.state.as_ref().ok_or(GpuError::SwapchainUninitialized)?;
        let (index, suboptimal) = self
            .driver
            .acquire_next_image(state.handle, u64::MAX, signal_semaphore)
            .map_err(GpuError::Acquire)?;
        Ok(AcquiredImage { index, suboptimal })
    }

    /// Present an image. Returns true if the swapchain should be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let state = self.state.as_ref().ok_or(GpuError::SwapchainUninitialized)?;
        let swapchains = [state.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.driver.queue_present(queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::Present(e)),
        }
    }

    /// Destroy views, then the swapchain. No-op when nothing is live.
    pub fn destroy(&mut self) {
        if let Some(state) = self.state.take() {
            self.release(&state.views, state.handle);
            log::debug!("Destroyed swapchain");
        }
    }

    fn release(&self, views: &[vk::ImageView], swapchain: vk::SwapchainKHR) {
        for &view in views {
            self.driver.destroy_image_view(view);
        }
        self.driver.destroy_swapchain(swapchain);
    }
}

impl<D: PresentationDriver> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn color_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo {
    vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: extent(SURFACE_DEFINED_EXTENT, SURFACE_DEFINED_EXTENT),
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn surface_defined_extent_uses_requested_size() {
        let caps = caps(2, 0);
        assert_eq!(resolve_extent(&caps, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn concrete_extent_overrides_requested_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1024, 768),
            ..caps(2, 0)
        };
        assert_eq!(resolve_extent(&caps, extent(800, 600)), extent(1024, 768));
        assert_eq!(resolve_extent(&caps, extent(1, 1)), extent(1024, 768));
    }

    #[test]
    fn vsync_always_uses_fifo() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn present_mode_fallbacks_without_vsync() {
        use vk::PresentModeKHR as P;
        assert_eq!(select_present_mode(&[P::IMMEDIATE, P::MAILBOX, P::FIFO], false), P::MAILBOX);
        assert_eq!(select_present_mode(&[P::MAILBOX, P::IMMEDIATE], false), P::MAILBOX);
        assert_eq!(select_present_mode(&[P::FIFO, P::IMMEDIATE], false), P::IMMEDIATE);
        assert_eq!(select_present_mode(&[P::FIFO, P::FIFO_RELAXED], false), P::FIFO);
        assert_eq!(select_present_mode(&[], false), P::FIFO);
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        assert_eq!(select_image_count(&caps(2, 0)), 3);
        assert_eq!(select_image_count(&caps(2, 8)), 3);
        assert_eq!(select_image_count(&caps(3, 3)), 3);
        assert_eq!(select_image_count(&caps(0, 1)), 1);
    }

    #[test]
    fn identity_transform_is_preferred() {
        let rotated = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::ROTATE_90
                | vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..caps(2, 0)
        };
        assert_eq!(select_pre_transform(&rotated), vk::SurfaceTransformFlagsKHR::IDENTITY);

        let fixed = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..rotated
        };
        assert_eq!(select_pre_transform(&fixed), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }

    #[test]
    fn composite_alpha_follows_preference_order() {
        let mut caps = caps(2, 0);
        caps.supported_composite_alpha =
            vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED;
        assert_eq!(select_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED);

        caps.supported_composite_alpha |= vk::CompositeAlphaFlagsKHR::OPAQUE;
        assert_eq!(select_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::OPAQUE);
    }

    #[test]
    fn surface_format_prefers_known_formats() {
        let listed = [
            format(vk::Format::R16G16B16A16_SFLOAT),
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(select_surface_format(&listed), Some(format(vk::Format::B8G8R8A8_UNORM)));
        assert_eq!(
            select_surface_format(&listed[..2]),
            Some(format(vk::Format::R8G8B8A8_UNORM))
        );
        assert_eq!(
            select_surface_format(&listed[..1]),
            Some(format(vk::Format::R16G16B16A16_SFLOAT))
        );
        assert_eq!(select_surface_format(&[]), None);
    }

    /// What the fake driver saw in the last create_swapchain call.
    #[derive(Debug, Clone, Copy)]
    struct SwapchainRequest {
        old_swapchain: vk::SwapchainKHR,
        min_image_count: u32,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        present_mode: vk::PresentModeKHR,
    }

    /// In-memory driver handing out numbered handles and tracking which ones
    /// are still alive.
    #[derive(Default)]
    struct FakeDriver {
        descriptor: RefCell<SurfaceDescriptor>,
        next_handle: Cell<u64>,
        swapchains: RefCell<BTreeSet<u64>>,
        views: RefCell<BTreeSet<u64>>,
        extra_images: Cell<u32>,
        fail_surface_query: Cell<Option<vk::Result>>,
        fail_swapchain: Cell<Option<vk::Result>>,
        fail_images: Cell<Option<vk::Result>>,
        fail_view_at: Cell<Option<usize>>,
        views_created: Cell<usize>,
        acquire_result: Cell<Option<VkResult<(u32, bool)>>>,
        last_timeout: Cell<u64>,
        last_request: Cell<Option<SwapchainRequest>>,
        image_counts: RefCell<std::collections::HashMap<u64, u32>>,
    }

    impl FakeDriver {
        fn with_caps(capabilities: vk::SurfaceCapabilitiesKHR) -> Self {
            let driver = Self::default();
            *driver.descriptor.borrow_mut() = SurfaceDescriptor {
                capabilities,
                formats: vec![format(vk::Format::B8G8R8A8_UNORM)],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            };
            driver
        }

        fn handle(&self) -> u64 {
            let next = self.next_handle.get() + 1;
            self.next_handle.set(next);
            next
        }

        fn live_swapchains(&self) -> usize {
            self.swapchains.borrow().len()
        }

        fn live_views(&self) -> usize {
            self.views.borrow().len()
        }
    }

    impl PresentationDriver for FakeDriver {
        fn surface_descriptor(&self, _surface: vk::SurfaceKHR) -> Result<SurfaceDescriptor> {
            if let Some(result) = self.fail_surface_query.take() {
                return Err(GpuError::SurfaceQuery {
                    query: "capabilities",
                    result,
                });
            }
            Ok(self.descriptor.borrow().clone())
        }

        fn create_swapchain(
            &self,
            info: &vk::SwapchainCreateInfoKHR,
        ) -> VkResult<vk::SwapchainKHR> {
            self.last_request.set(Some(SwapchainRequest {
                old_swapchain: info.old_swapchain,
                min_image_count: info.min_image_count,
                extent: info.image_extent,
                usage: info.image_usage,
                present_mode: info.present_mode,
            }));
            if let Some(result) = self.fail_swapchain.take() {
                return Err(result);
            }
            let handle = self.handle();
            self.swapchains.borrow_mut().insert(handle);
            self.image_counts
                .borrow_mut()
                .insert(handle, info.min_image_count + self.extra_images.get());
            Ok(vk::SwapchainKHR::from_raw(handle))
        }

        fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
            if let Some(result) = self.fail_images.take() {
                return Err(result);
            }
            let count = self.image_counts.borrow()[&swapchain.as_raw()];
            Ok((0..count)
                .map(|i| vk::Image::from_raw(swapchain.as_raw() * 100 + u64::from(i)))
                .collect())
        }

        fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
            assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
            assert_eq!(info.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
            assert_eq!(info.subresource_range.level_count, 1);
            assert_eq!(info.subresource_range.layer_count, 1);

            let call = self.views_created.get();
            self.views_created.set(call + 1);
            if self.fail_view_at.get() == Some(call) {
                self.fail_view_at.set(None);
                return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            let handle = self.handle();
            self.views.borrow_mut().insert(handle);
            Ok(vk::ImageView::from_raw(handle))
        }

        fn destroy_image_view(&self, view: vk::ImageView) {
            assert!(self.views.borrow_mut().remove(&view.as_raw()), "double destroy of {view:?}");
        }

        fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
            assert!(
                self.swapchains.borrow_mut().remove(&swapchain.as_raw()),
                "double destroy of {swapchain:?}"
            );
        }

        fn acquire_next_image(
            &self,
            _swapchain: vk::SwapchainKHR,
            timeout: u64,
            _semaphore: vk::Semaphore,
        ) -> VkResult<(u32, bool)> {
            self.last_timeout.set(timeout);
            self.acquire_result.get().unwrap_or(Ok((0, false)))
        }

        fn queue_present(&self, _queue: vk::Queue, _info: &vk::PresentInfoKHR) -> VkResult<bool> {
            Ok(false)
        }
    }

    fn surface() -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0xdead)
    }

    fn manager(capabilities: vk::SurfaceCapabilitiesKHR) -> SwapchainManager<FakeDriver> {
        SwapchainManager::new(FakeDriver::with_caps(capabilities))
    }

    #[test]
    fn starts_uninitialized() {
        let manager = manager(caps(2, 0));
        assert!(!manager.is_live());
        assert!(manager.images().is_empty());
        assert!(manager.views().is_empty());
        assert_eq!(manager.surface_format(), None);
        assert!(matches!(
            manager.acquire_next_image(vk::Semaphore::null()),
            Err(GpuError::SwapchainUninitialized)
        ));
    }

    #[test]
    fn create_builds_one_view_per_image() {
        // min+1 = 1, min+1 = 2, and min+1 clamped to the advertised max of 5
        for (capabilities, expected) in [(caps(0, 1), 1), (caps(1, 0), 2), (caps(5, 5), 5)] {
            let mut manager = manager(capabilities);
            manager.create(surface(), extent(800, 600), true).unwrap();

            assert_eq!(manager.images().len(), expected);
            assert_eq!(manager.views().len(), manager.images().len());
            assert_eq!(manager.driver().live_views(), expected);
            assert_eq!(manager.extent(), Some(extent(800, 600)));
        }
    }

    #[test]
    fn driver_image_count_is_authoritative() {
        let mut manager = manager(caps(2, 0));
        manager.driver().extra_images.set(1);
        manager.create(surface(), extent(640, 480), true).unwrap();

        assert_eq!(manager.driver().last_request.get().unwrap().min_image_count, 3);
        assert_eq!(manager.images().len(), 4);
        assert_eq!(manager.views().len(), 4);
    }

    #[test]
    fn create_requests_transfer_capable_images() {
        let mut manager = manager(caps(2, 0));
        manager.create(surface(), extent(800, 600), false).unwrap();

        let request = manager.driver().last_request.get().unwrap();
        assert!(request.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(request.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(request.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert_eq!(request.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(request.old_swapchain, vk::SwapchainKHR::null());
    }

    #[test]
    fn recreate_hands_over_and_retires_the_old_chain() {
        let mut manager = manager(caps(2, 0));
        manager.create(surface(), extent(800, 600), true).unwrap();
        let first = manager.state().unwrap().clone();

        manager.driver().descriptor.borrow_mut().capabilities.current_extent = extent(1024, 768);
        manager.create(surface(), extent(800, 600), true).unwrap();

        let request = manager.driver().last_request.get().unwrap();
        assert_eq!(request.old_swapchain, first.handle);
        assert_eq!(request.extent, extent(1024, 768));

        let second = manager.state().unwrap();
        assert_ne!(second.handle, first.handle);
        assert_eq!(manager.extent(), Some(extent(1024, 768)));
        assert_eq!(manager.driver().live_swapchains(), 1);
        assert_eq!(manager.driver().live_views(), second.views.len());
    }

    #[test]
    fn failed_recreation_keeps_the_previous_chain() {
        let mut manager = manager(caps(2, 0));
        manager.create(surface(), extent(800, 600), true).unwrap();
        let before = manager.state().unwrap().clone();

        manager
            .driver()
            .fail_swapchain
            .set(Some(vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR));
        let err = manager.create(surface(), extent(1280, 720), true).unwrap_err();
        assert!(matches!(
            err,
            GpuError::SwapchainCreation(vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR)
        ));

        assert_eq!(manager.state(), Some(&before));
        assert_eq!(manager.driver().live_swapchains(), 1);
        assert_eq!(manager.driver().live_views(), before.views.len());
    }

    #[test]
    fn failed_surface_query_keeps_the_previous_chain() {
        let mut manager = manager(caps(2, 0));
        manager.create(surface(), extent(800, 600), true).unwrap();
        let before = manager.state().unwrap().clone();

        manager
            .driver()
            .fail_surface_query
            .set(Some(vk::Result::ERROR_SURFACE_LOST_KHR));
        assert!(manager.create(surface(), extent(800, 600), true).is_err());
        assert_eq!(manager.state(), Some(&before));
    }

    #[test]
    fn surface_without_formats_is_rejected() {
        let mut manager = manager(caps(2, 0));
        manager.driver().descriptor.borrow_mut().formats.clear();

        let err = manager.create(surface(), extent(800, 600), true).unwrap_err();
        assert!(matches!(err, GpuError::SurfaceQuery { query: "formats", .. }));
        assert_eq!(manager.driver().live_swapchains(), 0);
    }

    #[test]
    fn view_failure_releases_the_half_built_chain() {
        let mut manager = manager(caps(2, 0));
        manager.driver().fail_view_at.set(Some(2));

        let err = manager.create(surface(), extent(800, 600), true).unwrap_err();
        assert!(matches!(err, GpuError::ImageView { index: 2, .. }));
        assert!(!manager.is_live());
        assert_eq!(manager.driver().live_views(), 0);
        assert_eq!(manager.driver().live_swapchains(), 0);

        // And the manager can start over
        manager.create(surface(), extent(800, 600), true).unwrap();
        assert_eq!(manager.views().len(), manager.images().len());
    }

    #[test]
    fn image_query_failure_releases_the_new_swapchain() {
        let mut manager = manager(caps(2, 0));
        manager
            .driver()
            .fail_images
            .set(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));

        assert!(matches!(
            manager.create(surface(), extent(800, 600), true),
            Err(GpuError::SwapchainCreation(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert!(!manager.is_live());
        assert_eq!(manager.driver().live_swapchains(), 0);
    }

    #[test]
    fn destroy_is_idempotent_and_allows_a_fresh_create() {
        let mut manager = manager(caps(2, 0));
        manager.create(surface(), extent(800, 600), true).unwrap();

        manager.destroy();
        manager.destroy();
        assert!(!manager.is_live());
        assert_eq!(manager.driver().live_swapchains(), 0);
        assert_eq!(manager.driver().live_views(), 0);

        manager.create(surface(), extent(800, 600), true).unwrap();
        assert_eq!(
            manager.driver().last_request.get().unwrap().old_swapchain,
            vk::SwapchainKHR::null()
        );
        assert_eq!(manager.driver().live_swapchains(), 1);
    }

    #[test]
    fn acquire_waits_indefinitely_and_surfaces_out_of_date() {
        let mut manager = manager(caps(2, 0));
        manager.create(surface(), extent(800, 600), true).unwrap();

        manager.driver().acquire_result.set(Some(Ok((2, true))));
        let image = manager.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert_eq!(image, AcquiredImage { index: 2, suboptimal: true });
        assert_eq!(manager.driver().last_timeout.get(), u64::MAX);

        manager
            .driver()
            .acquire_result
            .set(Some(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)));
        let err = manager.acquire_next_image(vk::Semaphore::null()).unwrap_err();
        assert!(err.is_out_of_date());
        // Acquire never tears anything down on its own
        assert!(manager.is_live());
    }
}
