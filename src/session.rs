use crate::config::Config;
use crate::handshake;
use crate::payload::PayloadPacker;
use crate::protocol::{FRAME_BYTES, FRAME_HEIGHT, FRAME_STRIDE, FRAME_WIDTH, PID, STREAM_INTERFACE, VID};
use crate::queue::{self, FrameStream};
use crate::stream::{StreamEngine, StreamStats};
use crate::transfer::{IsoTransport, UsbTransport};
use crate::types::{CalibrationSet, DeviceInfo, Frame, FrameStats, TemperatureModel};
use crate::{Result, Tc001Error};
use rusb::UsbContext;
use std::sync::Arc;

/// Replace zero ids with the TC001 defaults.
fn resolve_ids(vid: u16, pid: u16) -> (u16, u16) {
    (
        if vid == 0 { VID } else { vid },
        if pid == 0 { PID } else { pid },
    )
}

fn matches_ids(device: &rusb::Device<rusb::Context>, vid: u16, pid: u16) -> bool {
    device
        .device_descriptor()
        .map(|d| d.vendor_id() == vid && d.product_id() == pid)
        .unwrap_or(false)
}

fn device_info(device: &rusb::Device<rusb::Context>, vid: u16, pid: u16) -> DeviceInfo {
    DeviceInfo {
        vendor_id: vid,
        product_id: pid,
        bus_number: device.bus_number(),
        address: device.address(),
    }
}

/// List connected devices matching `vid`/`pid` (0 selects the TC001 ids).
pub fn list_devices(vid: u16, pid: u16) -> Result<Vec<DeviceInfo>> {
    let (vid, pid) = resolve_ids(vid, pid);
    let context = rusb::Context::new().map_err(|e| Tc001Error::usb("init libusb", e))?;
    let devices = context
        .devices()
        .map_err(|e| Tc001Error::usb("enumerate devices", e))?;

    Ok(devices
        .iter()
        .filter(|d| matches_ids(d, vid, pid))
        .map(|d| device_info(&d, vid, pid))
        .collect())
}

/// An opened, handshaken TC001 ready to stream.
///
/// Dropping the session closes it: streaming stops, the interface is
/// released and the device handle and libusb context are torn down.
pub struct Session<T: IsoTransport = UsbTransport> {
    info: DeviceInfo,
    engine: Option<StreamEngine<T>>,
    packer: PayloadPacker,
}

impl Session {
    /// Open the first device matching `vid`/`pid` (0 selects the TC001 ids),
    /// with timing taken from the environment.
    pub fn open(vid: u16, pid: u16) -> Result<Session> {
        Self::open_with_config(vid, pid, Config::from_env())
    }

    pub fn open_with_config(vid: u16, pid: u16, config: Config) -> Result<Session> {
        let (vid, pid) = resolve_ids(vid, pid);
        let context = rusb::Context::new().map_err(|e| Tc001Error::usb("init libusb", e))?;
        let devices = context
            .devices()
            .map_err(|e| Tc001Error::usb("enumerate devices", e))?;
        let device = devices
            .iter()
            .find(|d| matches_ids(d, vid, pid))
            .ok_or(Tc001Error::DeviceNotFound { vid, pid })?;
        let info = device_info(&device, vid, pid);

        let handle = device.open().map_err(|e| Tc001Error::usb("open device", e))?;
        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => log::warn!("Auto-detach of kernel driver unavailable: {}", e),
        }
        handle
            .claim_interface(STREAM_INTERFACE)
            .map_err(|e| Tc001Error::usb("claim interface", e))?;

        // From here on dropping `transport` releases the interface.
        let mut transport = UsbTransport::new(context, handle, STREAM_INTERFACE);
        handshake::run(transport.handle_mut(), config.control_timeout)?;
        let session = Session::with_transport(info, Arc::new(transport), config)?;

        log::info!(
            "Opened TC001 {:04X}:{:04X} on bus {} address {}",
            session.info.vendor_id,
            session.info.product_id,
            session.info.bus_number,
            session.info.address
        );
        Ok(session)
    }
}

impl<T: IsoTransport> Session<T> {
    /// Wrap an opened, handshaken transport. Allocation failure drops the
    /// transport, releasing whatever it holds.
    pub(crate) fn with_transport(info: DeviceInfo, transport: Arc<T>, config: Config) -> Result<Self> {
        Ok(Session {
            info,
            engine: Some(StreamEngine::new(transport, config)?),
            packer: PayloadPacker::new(),
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn engine_mut(&mut self) -> Result<&mut StreamEngine<T>> {
        self.engine.as_mut().ok_or(Tc001Error::State("session closed"))
    }

    /// Start streaming. `callback` runs on the event thread once per
    /// complete frame; it must be quick and must copy anything it keeps.
    pub fn start<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&Frame<'_>) + Send + 'static,
    {
        self.engine_mut()?.start(Box::new(callback))
    }

    /// Start streaming into a bounded queue of `capacity` owned frames.
    pub fn start_stream(&mut self, capacity: usize) -> Result<FrameStream> {
        let engine = self.engine_mut()?;
        let (callback, stream) = queue::frame_channel(capacity, FRAME_BYTES)?;
        engine.start(callback)?;
        Ok(stream)
    }

    /// Stop streaming. No-op when idle or closed.
    pub fn stop(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.engine.as_ref().map_or(false, |e| e.is_running())
    }

    pub fn stats(&self) -> StreamStats {
        self.engine.as_ref().map(|e| e.stats()).unwrap_or_default()
    }

    /// `(width, height, stride)` of delivered frames.
    pub fn frame_dims(&self) -> (u32, u32, u32) {
        (FRAME_WIDTH, FRAME_HEIGHT, FRAME_STRIDE as u32)
    }

    pub fn set_calibration(&mut self, calibration: CalibrationSet) {
        self.packer.set_calibration(calibration);
    }

    pub fn set_temperature_model(&mut self, model: TemperatureModel) {
        self.packer.set_temperature_model(model);
    }

    /// Pack the most recent frame into a fusion payload. Fails with a state
    /// error until a frame has been delivered.
    pub fn pack(
        &mut self,
        dst: &mut [u8],
        thumb_width: usize,
        thumb_height: usize,
        use_agc: bool,
    ) -> Result<usize> {
        let engine = self.engine.as_ref().ok_or(Tc001Error::State("session closed"))?;
        let packer = &mut self.packer;
        engine
            .with_latest(|frame| packer.pack(frame, dst, thumb_width, thumb_height, use_agc))
            .unwrap_or(Err(Tc001Error::State("no frame captured yet")))
    }

    /// Statistics of the most recent frame.
    pub fn latest_stats(&mut self) -> Result<FrameStats> {
        let engine = self.engine.as_ref().ok_or(Tc001Error::State("session closed"))?;
        let packer = &mut self.packer;
        engine
            .with_latest(|frame| packer.frame_stats(frame))
            .unwrap_or(Err(Tc001Error::State("no frame captured yet")))
    }

    /// Stop streaming and release the device. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
            drop(engine);
            log::info!(
                "Closed TC001 on bus {} address {}",
                self.info.bus_number,
                self.info.address
            );
        }
    }
}

impl<T: IsoTransport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}
