//! End-to-end checks of the controller over in-memory and real FIFO links

use crossbeam::channel::{unbounded, Receiver};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mcu_link::config::ControllerConfig;
use mcu_link::controller::{
    make_or_dummy, make_or_dummy_with, Controller, ControllerEvent, LogMidiSink,
    McuFifoController,
};
use mcu_link::device::{DeviceError, DeviceLink, FrameSource};
use mcu_link::keys::{Key, Led, LedColor};
use mcu_link::midi::MidiMessage;

struct ChannelSource(Receiver<Vec<u8>>);

impl FrameSource for ChannelSource {
    fn read_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
        self.0
            .recv_timeout(Duration::from_millis(5))
            .map_err(|_| DeviceError::EmptyBuffer)
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<u8>>>);

impl Write for Recorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn keys_route_to_midi_and_leds_reach_the_board() {
    let (frames_tx, frames_rx) = unbounded();
    let (input_tx, input_rx) = unbounded::<ControllerEvent>();
    let (midi_tx, midi_rx) = unbounded::<MidiMessage>();
    let recorder = Recorder::default();
    let written = Arc::clone(&recorder.0);

    let config = ControllerConfig {
        midi_channel: 2,
        ..ControllerConfig::default()
    };
    let controller = make_or_dummy_with(
        || {
            Ok(DeviceLink {
                source: Box::new(ChannelSource(frames_rx)),
                sink: Box::new(recorder),
            })
        },
        &config,
        Arc::new(input_tx),
        Arc::new(midi_tx),
    );
    assert_eq!(controller.name(), "mcu-fifo");
    assert!(controller.is_connected());

    frames_tx.send(vec![0x20, Key::S0.to_byte()]).unwrap();
    frames_tx.send(vec![0x20, Key::Shift.to_byte()]).unwrap();
    frames_tx.send(vec![0x33, 0xFD]).unwrap();

    let note = midi_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(note, MidiMessage::note_on(1, 47));
    assert_eq!(
        input_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        ControllerEvent::KeyPress(Key::Shift)
    );
    match input_rx.recv_timeout(Duration::from_secs(2)).unwrap() {
        ControllerEvent::Encoder(e) => assert_eq!(e.steps, -3),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(controller.is_pressed(Key::S0));

    controller.set_color(Led(Key::S0), LedColor::WHITE);
    controller.flush_leds().unwrap();
    assert_eq!(*written.lock(), vec![0xEC, Key::S0.to_byte(), 0xFF, 0xFF, 0xFF]);
}

#[test]
fn many_threads_queue_one_flush_delivers_all() {
    let (_frames_tx, frames_rx) = unbounded();
    let recorder = Recorder::default();
    let written = Arc::clone(&recorder.0);

    let controller = make_or_dummy_with(
        || {
            Ok(DeviceLink {
                source: Box::new(ChannelSource(frames_rx)),
                sink: Box::new(recorder),
            })
        },
        &ControllerConfig::default(),
        Arc::new(unbounded::<ControllerEvent>().0),
        Arc::new(LogMidiSink),
    );

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                for _ in 0..100 {
                    controller.clear_led_group(7);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    controller.flush_leds().unwrap();
    let written = written.lock();
    assert_eq!(written.len(), 4 * 100 * 2);
    assert!(written.chunks(2).all(|f| f == [0xE1, 0x07]));
}

#[test]
fn failed_open_yields_dummy() {
    let controller = make_or_dummy_with(
        || Err(DeviceError::Io(io::Error::from(io::ErrorKind::NotFound))),
        &ControllerConfig::default(),
        Arc::new(unbounded::<ControllerEvent>().0),
        Arc::new(LogMidiSink),
    );

    assert_eq!(controller.name(), "dummy");
    controller.clear_leds();
    assert!(controller.flush_leds().is_ok());
}

#[cfg(unix)]
#[test]
fn real_fifo_device_end_to_end() {
    use std::fs::OpenOptions;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mcu_fifo");
    mkfifo(&path);

    let config = ControllerConfig {
        device: path.clone(),
        send_midi: false,
        ..ControllerConfig::default()
    };
    let (input_tx, input_rx) = unbounded::<ControllerEvent>();
    let controller = make_or_dummy(&config, Arc::new(input_tx), Arc::new(LogMidiSink));
    assert_eq!(controller.name(), "mcu-fifo");

    let mut board = OpenOptions::new().write(true).open(&path).unwrap();
    board.write_all(&[0x20, Key::C3.to_byte(), 0x21]).unwrap();
    board.write_all(&[Key::C3.to_byte()]).unwrap();

    let events: Vec<_> = (0..2)
        .map(|_| input_rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect();
    assert_eq!(
        events,
        vec![
            ControllerEvent::KeyPress(Key::C3),
            ControllerEvent::KeyRelease(Key::C3)
        ]
    );

    drop(controller);
}

#[cfg(unix)]
fn mkfifo(path: &std::path::Path) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);
}

#[cfg(unix)]
#[test]
fn slow_board_gets_every_led_frame_whole() {
    use std::fs::OpenOptions;
    use std::io::Read;
    use std::os::unix::fs::OpenOptionsExt;
    use std::time::Instant;

    const FRAMES: u32 = 20_000;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mcu_in");
    let output = dir.path().join("mcu_out");
    mkfifo(&input);
    mkfifo(&output);

    let config = ControllerConfig {
        device: input,
        output_device: Some(output.clone()),
        ..ControllerConfig::default()
    };
    let controller = McuFifoController::open(
        &config,
        Arc::new(unbounded::<ControllerEvent>().0),
        Arc::new(LogMidiSink),
    )
    .unwrap();

    // Far more than a pipe holds, with nobody reading yet
    for i in 0..FRAMES {
        controller.set_color(Led(Key::S0), LedColor::from_rgb(i));
    }
    controller.flush_leds().unwrap();
    assert!(controller.backlog_bytes() > 0);

    let mut board = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&output)
        .unwrap();
    let expected_len = FRAMES as usize * 5;
    let mut received = Vec::with_capacity(expected_len);
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(5);

    while received.len() < expected_len && Instant::now() < deadline {
        match board.read(&mut buf) {
            Ok(n) if n > 0 => received.extend_from_slice(&buf[..n]),
            Ok(_) => thread::sleep(Duration::from_millis(1)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                controller.flush_leds().unwrap();
            }
            Err(e) => panic!("reading LED frames failed: {}", e),
        }
    }

    assert_eq!(received.len(), expected_len);
    assert_eq!(controller.backlog_bytes(), 0);
    for (i, frame) in received.chunks(5).enumerate() {
        let color = LedColor::from_rgb(i as u32);
        assert_eq!(frame, [0xEC, Key::S0.to_byte(), color.r, color.g, color.b]);
    }
}

#[cfg(unix)]
#[test]
fn led_frames_stay_off_the_input_path() {
    use std::fs::OpenOptions;
    use std::io::Read;
    use std::os::unix::fs::OpenOptionsExt;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mcu_in");
    let output = dir.path().join("mcu_out");
    mkfifo(&input);
    mkfifo(&output);

    let config = ControllerConfig {
        device: input.clone(),
        output_device: Some(output.clone()),
        send_midi: false,
        ..ControllerConfig::default()
    };
    let (input_tx, input_rx) = unbounded::<ControllerEvent>();
    let controller = make_or_dummy(&config, Arc::new(input_tx), Arc::new(LogMidiSink));
    assert_eq!(controller.name(), "mcu-fifo");

    // A key_down for C3 written back into the input pipe would come out as a press
    controller.queue_message(&[0x20, Key::C3.to_byte()]);
    controller.flush_leds().unwrap();
    assert!(input_rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(!controller.is_pressed(Key::C3));

    let mut board_out = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&output)
        .unwrap();
    let mut buf = [0u8; 16];
    let n = board_out.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], &[0x20, Key::C3.to_byte()]);

    let mut board_in = OpenOptions::new().write(true).open(&input).unwrap();
    board_in.write_all(&[0x20, Key::C3.to_byte()]).unwrap();
    assert_eq!(
        input_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        ControllerEvent::KeyPress(Key::C3)
    );
}
