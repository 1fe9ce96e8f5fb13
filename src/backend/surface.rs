// Presentation surface
//
// Platform-specific window connection. Each supported window system gets
// its create-info path here, plus the matching instance-extension query
// used when the instance is created.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

use super::VulkanInstance;

/// Instance extensions required to present on the given display system.
pub fn required_extension_names(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let surface = ash::extensions::khr::Surface::name();
    let names = match display {
        RawDisplayHandle::Windows(_) => {
            vec![surface, ash::extensions::khr::Win32Surface::name()]
        }
        RawDisplayHandle::Xlib(_) => {
            vec![surface, ash::extensions::khr::XlibSurface::name()]
        }
        RawDisplayHandle::Xcb(_) => {
            vec![surface, ash::extensions::khr::XcbSurface::name()]
        }
        RawDisplayHandle::Wayland(_) => {
            vec![surface, ash::extensions::khr::WaylandSurface::name()]
        }
        other => anyhow::bail!("Unsupported display system: {:?}", other),
    };
    Ok(names)
}

/// Window surface plus the extension loader that operates on it.
pub struct VulkanSurface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl VulkanSurface {
    pub fn new(
        instance: Arc<VulkanInstance>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);
        let handle = create_platform_surface(&instance, display_handle, window_handle)
            .context("Failed to create window surface")?;

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

fn create_platform_surface(
    instance: &VulkanInstance,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let entry = &instance.entry;
    let instance = &instance.instance;

    let surface = unsafe {
        match (display_handle, window_handle) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let hinstance =
                    handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
                let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                let loader = ash::extensions::khr::Win32Surface::new(entry, instance);
                loader.create_win32_surface(&create_info, None)?
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let dpy = display
                    .display
                    .map_or(std::ptr::null_mut(), |d| d.as_ptr());
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy as *mut _)
                    .window(handle.window);
                let loader = ash::extensions::khr::XlibSurface::new(entry, instance);
                loader.create_xlib_surface(&create_info, None)?
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                let connection = display
                    .connection
                    .map_or(std::ptr::null_mut(), |c| c.as_ptr());
                let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(connection as *mut _)
                    .window(handle.window.get());
                let loader = ash::extensions::khr::XcbSurface::new(entry, instance);
                loader.create_xcb_surface(&create_info, None)?
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr() as *mut _)
                    .surface(handle.surface.as_ptr() as *mut _);
                let loader = ash::extensions::khr::WaylandSurface::new(entry, instance);
                loader.create_wayland_surface(&create_info, None)?
            }
            _ => anyhow::bail!("Unsupported window handle type"),
        }
    };

    Ok(surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, WindowsDisplayHandle, XlibDisplayHandle};

    #[test]
    fn every_platform_requires_the_surface_extension() {
        let xlib = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let windows = RawDisplayHandle::Windows(WindowsDisplayHandle::new());
        let wayland = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(
            std::ptr::NonNull::dangling(),
        ));

        for display in [xlib, windows, wayland] {
            let names = required_extension_names(display).unwrap();
            assert!(names.contains(&ash::extensions::khr::Surface::name()));
            assert_eq!(names.len(), 2);
        }
    }

    #[test]
    fn platform_extension_matches_display_system() {
        let names =
            required_extension_names(RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)))
                .unwrap();
        assert!(names.contains(&ash::extensions::khr::XlibSurface::name()));

        let names = required_extension_names(RawDisplayHandle::Wayland(
            WaylandDisplayHandle::new(std::ptr::NonNull::dangling()),
        ))
        .unwrap();
        assert!(names.contains(&ash::extensions::khr::WaylandSurface::name()));
    }
}
