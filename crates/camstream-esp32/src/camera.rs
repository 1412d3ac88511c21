//! esp32-camera driver as a frame source.
//!
//! The driver owns a pool of `fb_count` frame buffers. `esp_camera_fb_get`
//! lends one out and `esp_camera_fb_return` hands it back; a buffer that is
//! never returned starves the pool.

use std::ptr::NonNull;

use anyhow::{anyhow, bail, Result};
use camstream_core::{CameraConfig, FrameSize, FrameSource, GrabMode};
use esp_idf_svc::sys::camera::{
    camera_config_t, camera_fb_location_t_CAMERA_FB_IN_DRAM, camera_fb_location_t_CAMERA_FB_IN_PSRAM,
    camera_fb_t, camera_grab_mode_t_CAMERA_GRAB_LATEST, camera_grab_mode_t_CAMERA_GRAB_WHEN_EMPTY,
    esp_camera_deinit, esp_camera_fb_get, esp_camera_fb_return, esp_camera_init, esp_camera_sensor_get,
    framesize_t, framesize_t_FRAMESIZE_QVGA, framesize_t_FRAMESIZE_SVGA, framesize_t_FRAMESIZE_SXGA,
    framesize_t_FRAMESIZE_UXGA, framesize_t_FRAMESIZE_VGA, framesize_t_FRAMESIZE_XGA,
    ledc_channel_t_LEDC_CHANNEL_0, ledc_timer_t_LEDC_TIMER_0, pixformat_t_PIXFORMAT_JPEG,
};
use esp_idf_svc::sys::EspError;
use log::info;

/// AI-Thinker ESP32-CAM pinout.
mod pinout {
    pub const PWDN: i32 = 32;
    pub const RESET: i32 = -1;
    pub const XCLK: i32 = 0;
    pub const SIOD: i32 = 26;
    pub const SIOC: i32 = 27;
    pub const Y9: i32 = 35;
    pub const Y8: i32 = 34;
    pub const Y7: i32 = 39;
    pub const Y6: i32 = 36;
    pub const Y5: i32 = 21;
    pub const Y4: i32 = 19;
    pub const Y3: i32 = 18;
    pub const Y2: i32 = 5;
    pub const VSYNC: i32 = 25;
    pub const HREF: i32 = 23;
    pub const PCLK: i32 = 22;
}

fn framesize(size: FrameSize) -> framesize_t {
    match size {
        FrameSize::Qvga => framesize_t_FRAMESIZE_QVGA,
        FrameSize::Vga => framesize_t_FRAMESIZE_VGA,
        FrameSize::Svga => framesize_t_FRAMESIZE_SVGA,
        FrameSize::Xga => framesize_t_FRAMESIZE_XGA,
        FrameSize::Sxga => framesize_t_FRAMESIZE_SXGA,
        FrameSize::Uxga => framesize_t_FRAMESIZE_UXGA,
    }
}

fn driver_config(config: &CameraConfig) -> Result<camera_config_t> {
    let mut driver = camera_config_t::default();

    driver.pin_pwdn = pinout::PWDN;
    driver.pin_reset = pinout::RESET;
    driver.pin_xclk = pinout::XCLK;
    driver.pin_d7 = pinout::Y9;
    driver.pin_d6 = pinout::Y8;
    driver.pin_d5 = pinout::Y7;
    driver.pin_d4 = pinout::Y6;
    driver.pin_d3 = pinout::Y5;
    driver.pin_d2 = pinout::Y4;
    driver.pin_d1 = pinout::Y3;
    driver.pin_d0 = pinout::Y2;
    driver.pin_vsync = pinout::VSYNC;
    driver.pin_href = pinout::HREF;
    driver.pin_pclk = pinout::PCLK;
    // SCCB pins live in anonymous unions in driver v2.x+.
    driver.__bindgen_anon_1.pin_sccb_sda = pinout::SIOD;
    driver.__bindgen_anon_2.pin_sccb_scl = pinout::SIOC;

    driver.xclk_freq_hz = i32::try_from(config.xclk_freq_hz)
        .map_err(|_| anyhow!("XCLK frequency {} Hz out of range", config.xclk_freq_hz))?;
    driver.ledc_timer = ledc_timer_t_LEDC_TIMER_0;
    driver.ledc_channel = ledc_channel_t_LEDC_CHANNEL_0;

    driver.pixel_format = pixformat_t_PIXFORMAT_JPEG;
    driver.frame_size = framesize(config.frame_size);
    driver.jpeg_quality = i32::from(config.jpeg_quality);
    driver.fb_count = usize::from(config.fb_count);
    // More than one large buffer only fits in PSRAM.
    driver.fb_location = if config.fb_count > 1 {
        camera_fb_location_t_CAMERA_FB_IN_PSRAM
    } else {
        camera_fb_location_t_CAMERA_FB_IN_DRAM
    };
    driver.grab_mode = match config.grab_mode {
        GrabMode::WhenEmpty => camera_grab_mode_t_CAMERA_GRAB_WHEN_EMPTY,
        GrabMode::Latest => camera_grab_mode_t_CAMERA_GRAB_LATEST,
    };

    Ok(driver)
}

/// A frame buffer lent by the camera driver.
pub struct CameraFrame {
    fb: NonNull<camera_fb_t>,
}

impl AsRef<[u8]> for CameraFrame {
    fn as_ref(&self) -> &[u8] {
        let fb = self.fb.as_ptr();
        unsafe { std::slice::from_raw_parts((*fb).buf, (*fb).len) }
    }
}

/// The initialized camera driver.
///
/// Only one instance may exist; dropping it deinitializes the driver.
pub struct EspCamera {
    _initialized: (),
}

impl EspCamera {
    /// Initialize the driver and apply sensor orientation.
    pub fn init(config: &CameraConfig) -> Result<Self> {
        let driver = driver_config(config)?;
        EspError::convert(unsafe { esp_camera_init(&driver) })
            .map_err(|e| anyhow!("Camera init failed with error {}", e))?;

        let camera = Self { _initialized: () };
        camera.apply_orientation(config)?;

        let (width, height) = config.frame_size.dimensions();
        info!(
            "Camera ready: {}x{} JPEG, quality {}, {} frame buffer(s)",
            width, height, config.jpeg_quality, config.fb_count
        );
        Ok(camera)
    }

    fn apply_orientation(&self, config: &CameraConfig) -> Result<()> {
        let sensor = unsafe { esp_camera_sensor_get() };
        if sensor.is_null() {
            bail!("Camera sensor not detected");
        }

        unsafe {
            if let Some(set_vflip) = (*sensor).set_vflip {
                set_vflip(sensor, i32::from(config.vflip));
            }
            if let Some(set_hmirror) = (*sensor).set_hmirror {
                set_hmirror(sensor, i32::from(config.hmirror));
            }
        }
        Ok(())
    }
}

impl FrameSource for EspCamera {
    type Frame = CameraFrame;

    fn acquire(&mut self) -> Option<CameraFrame> {
        NonNull::new(unsafe { esp_camera_fb_get() }).map(|fb| CameraFrame { fb })
    }

    fn release(&mut self, frame: CameraFrame) {
        unsafe { esp_camera_fb_return(frame.fb.as_ptr()) }
    }
}

impl Drop for EspCamera {
    fn drop(&mut self) {
        unsafe {
            esp_camera_deinit();
        }
    }
}
