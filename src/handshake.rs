use crate::protocol::{self, ControlRequest, STREAM_ALT_SETTING, STREAM_INTERFACE};
use crate::{Result, Tc001Error};
use std::time::Duration;

/// The control endpoint of an opened device.
///
/// Implemented for `rusb::DeviceHandle`; tests substitute a recorder.
pub trait ControlPipe {
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> rusb::Result<()>;
}

impl<T: rusb::UsbContext> ControlPipe for rusb::DeviceHandle<T> {
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        rusb::DeviceHandle::write_control(self, request_type, request, value, index, data, timeout)
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::set_alternate_setting(self, interface, setting)
    }
}

/// Run the start-up sequence: the four handshake transfers in order, then the
/// streaming alternate setting. Stops at the first failure; no retries.
pub fn run<P: ControlPipe>(pipe: &mut P, timeout: Duration) -> Result<()> {
    for step in protocol::HANDSHAKE.iter() {
        send(pipe, step, timeout)?;
    }

    pipe.set_alternate_setting(STREAM_INTERFACE, STREAM_ALT_SETTING)
        .map_err(|e| Tc001Error::usb("set alt setting", e))?;
    log::debug!(
        "Selected alt setting {} on interface {}",
        STREAM_ALT_SETTING,
        STREAM_INTERFACE
    );
    Ok(())
}

fn send<P: ControlPipe>(pipe: &mut P, step: &ControlRequest, timeout: Duration) -> Result<()> {
    let written = pipe
        .write_control(
            step.request_type,
            step.request,
            step.value,
            step.index,
            step.data,
            timeout,
        )
        .map_err(|e| Tc001Error::usb(step.label, e))?;

    if written != step.data.len() {
        log::warn!(
            "{}: short write ({} of {} bytes)",
            step.label,
            written,
            step.data.len()
        );
    } else {
        log::debug!("{} sent ({} bytes)", step.label, written);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Recorded {
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: Vec<u8>,
    }

    #[derive(Default)]
    struct RecordingPipe {
        sent: Vec<Recorded>,
        alt_setting: Option<(u8, u8)>,
        fail_at: Option<usize>,
    }

    impl ControlPipe for RecordingPipe {
        fn write_control(
            &mut self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            data: &[u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            if self.fail_at == Some(self.sent.len()) {
                return Err(rusb::Error::Pipe);
            }
            self.sent.push(Recorded {
                request_type,
                request,
                value,
                index,
                data: data.to_vec(),
            });
            Ok(data.len())
        }

        fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> rusb::Result<()> {
            self.alt_setting = Some((interface, setting));
            Ok(())
        }
    }

    #[test]
    fn test_handshake_sends_sequence_in_order() {
        let mut pipe = RecordingPipe::default();
        run(&mut pipe, Duration::from_millis(1000)).unwrap();

        assert_eq!(pipe.sent.len(), 4);
        let headers: Vec<(u8, u8, u16, u16)> = pipe
            .sent
            .iter()
            .map(|r| (r.request_type, r.request, r.value, r.index))
            .collect();
        assert_eq!(
            headers,
            vec![
                (0x00, 0x09, 0x0001, 0x0000),
                (0x41, 0x45, 0x0078, 0x1d00),
                (0x21, 0x01, 0x0100, 0x0001),
                (0x21, 0x01, 0x0200, 0x0001),
            ]
        );
        assert_eq!(pipe.alt_setting, Some((1, 7)));
    }

    #[test]
    fn test_handshake_payloads_are_byte_exact() {
        let mut pipe = RecordingPipe::default();
        run(&mut pipe, Duration::from_millis(1000)).unwrap();

        #[rustfmt::skip]
        let expected: [&[u8]; 4] = [
            &[
                0x1c, 0x00, 0x90, 0x05, 0x9a, 0xab, 0x83, 0xe2,
                0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x01, 0x00, 0x0d, 0x00, 0x00, 0x02, 0x08,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0x01, 0x00,
                0x00, 0x00, 0x00, 0x00,
            ],
            &[0x05, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08],
            &[
                0x01, 0x00, 0x01, 0x02, 0x80, 0x1a, 0x06, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20,
                0x00, 0x00, 0x80, 0x01, 0x00, 0x00, 0x0c, 0x00, 0x00,
            ],
            &[
                0x01, 0x00, 0x01, 0x02, 0x80, 0x1a, 0x06, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20,
                0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x0c, 0x00, 0x00,
            ],
        ];

        assert_eq!(pipe.sent.len(), expected.len());
        for (sent, want) in pipe.sent.iter().zip(expected.iter()) {
            assert_eq!(sent.data.as_slice(), *want);
        }
    }

    #[test]
    fn test_handshake_aborts_on_failed_step() {
        let mut pipe = RecordingPipe {
            fail_at: Some(2),
            ..Default::default()
        };
        let err = run(&mut pipe, Duration::from_millis(1000)).unwrap_err();

        match err {
            Tc001Error::Usb { context, source } => {
                assert_eq!(context, "probe");
                assert_eq!(source, rusb::Error::Pipe);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pipe.sent.len(), 2);
        assert_eq!(pipe.alt_setting, None);
    }
}
