use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use vision_assist::{
    CaptureMode, ConnectionState, Esp32Config, Esp32Source, Frame, FrameError, FrameSource,
    ServiceError, SourceSelector, SpeechOutput, SpeechSink, WebcamConfig, WebcamSource,
};

#[derive(Clone, Default)]
struct Transcript {
    spoken: Arc<Mutex<Vec<String>>>,
    speaking: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    delay: Duration,
}

impl SpeechOutput for Transcript {
    fn speak(&mut self, text: &str) -> Result<(), ServiceError> {
        if self.speaking.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        std::thread::sleep(self.delay);
        self.spoken.lock().unwrap().push(text.to_string());
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn test_jpeg(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let pixels = [shade, shade / 2, 255 - shade].repeat((width * height) as usize);
    Frame::from_rgb(width, height, pixels)
        .expect("frame")
        .encode_jpeg()
        .expect("encode")
}

fn read_request(stream: &std::net::TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    while reader.read_line(&mut line).unwrap_or(0) > 0 {
        if line == "\r\n" {
            break;
        }
        line.clear();
    }
}

/// Serve one multipart MJPEG response carrying `frames`.
fn mjpeg_server(frames: Vec<Vec<u8>>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}/stream", listener.local_addr().expect("addr"));
    let join = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        read_request(&stream);
        let _ = stream.write_all(
            b"HTTP/1.1 200 OK\r\n\
              Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
              Connection: close\r\n\r\n",
        );
        for jpeg in frames {
            let header = format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            );
            let _ = stream.write_all(header.as_bytes());
            // Split each image across writes so the reader sees partial payloads.
            let (head, tail) = jpeg.split_at(jpeg.len() / 2);
            let _ = stream.write_all(head);
            let _ = stream.flush();
            let _ = stream.write_all(tail);
            let _ = stream.write_all(b"\r\n");
        }
    });
    (url, join)
}

/// Answer `count` single-shot capture requests.
fn snapshot_server(count: usize) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}/capture", listener.local_addr().expect("addr"));
    let join = std::thread::spawn(move || {
        for i in 0..count {
            let (mut stream, _) = listener.accept().expect("accept");
            read_request(&stream);
            let jpeg = test_jpeg(20, 10, (i * 40) as u8);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                jpeg.len()
            );
            let _ = stream.write_all(header.as_bytes());
            let _ = stream.write_all(&jpeg);
        }
    });
    (url, join)
}

fn esp32_config(url: String, mode: CaptureMode) -> Esp32Config {
    Esp32Config {
        url,
        mode,
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
    }
}

#[test]
fn esp32_stream_yields_frames_in_order() -> anyhow::Result<()> {
    let frames = vec![test_jpeg(32, 24, 10), test_jpeg(32, 24, 200), test_jpeg(16, 8, 90)];
    let (url, server) = mjpeg_server(frames);
    let mut source = Esp32Source::new(esp32_config(url, CaptureMode::Stream))?;

    source.open()?;
    assert_eq!(source.state(), ConnectionState::Connecting);
    let first = source.read_frame()?;
    assert_eq!((first.width(), first.height()), (32, 24));
    assert_eq!(source.state(), ConnectionState::Connected);
    let second = source.read_frame()?;
    assert_eq!(second.width(), 32);
    let third = source.read_frame()?;
    assert_eq!((third.width(), third.height()), (16, 8));

    // The server hung up: the next read is a failure, not a hang.
    assert!(source.read_frame().is_err());
    assert_eq!(source.state(), ConnectionState::Failed);
    let stats = source.stats();
    assert_eq!(stats.frames_captured, 3);
    assert_eq!(stats.frames_failed, 1);

    source.close();
    server.join().expect("server thread");
    Ok(())
}

#[test]
fn corrupt_payload_does_not_cost_the_next_frame() -> anyhow::Result<()> {
    let corrupt = vec![0xFF, 0xD8, 0x00, 0x01, 0x02, 0xFF, 0xD9];
    let (url, server) = mjpeg_server(vec![corrupt, test_jpeg(8, 8, 60)]);
    let esp32 = Esp32Source::new(esp32_config(url, CaptureMode::Stream))?;

    let transcript = Transcript::default();
    let speech = SpeechSink::spawn(Box::new(transcript.clone()))?;
    let mut selector = SourceSelector::new(vec![Box::new(esp32)], speech.announcer())?;

    assert!(matches!(selector.get_frame(), Err(FrameError::Decode(_))));
    let frame = selector.get_frame()?;
    assert_eq!((frame.width(), frame.height()), (8, 8));
    assert_eq!(selector.active_index(), 0);
    assert!(!selector.is_exhausted());

    let stats = selector.stats();
    assert_eq!(stats[0].frames_captured, 1);
    assert_eq!(stats[0].frames_failed, 1);

    selector.close_all();
    server.join().expect("server thread");
    assert!(speech.shutdown(Duration::from_secs(5)));
    assert_eq!(
        *transcript.spoken.lock().unwrap(),
        vec!["Connecting to ESP32 camera at 127.0.0.1."]
    );
    Ok(())
}

#[test]
fn esp32_snapshot_mode_fetches_one_image_per_read() -> anyhow::Result<()> {
    let (url, server) = snapshot_server(2);
    let mut source = Esp32Source::new(esp32_config(url, CaptureMode::Snapshot))?;

    source.open()?;
    for _ in 0..2 {
        let frame = source.read_frame()?;
        assert_eq!((frame.width(), frame.height()), (20, 10));
    }
    server.join().expect("server thread");
    Ok(())
}

#[test]
fn unreachable_camera_falls_back_to_webcam_with_notices() -> anyhow::Result<()> {
    // Bind then drop to get a local port with nothing listening.
    let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let esp32 = Esp32Source::new(esp32_config(
        format!("http://127.0.0.1:{}/stream", port),
        CaptureMode::Stream,
    ))?;
    let webcam = WebcamSource::new(WebcamConfig {
        device: "stub://bench".to_string(),
        width: 48,
        height: 32,
    });

    let transcript = Transcript::default();
    let speech = SpeechSink::spawn(Box::new(transcript.clone()))?;
    let mut selector = SourceSelector::new(vec![Box::new(esp32), Box::new(webcam)], speech.announcer())?;

    let frame = selector.get_frame()?;
    assert_eq!((frame.width(), frame.height()), (48, 32));
    assert_eq!(selector.active_index(), 1);

    // Subsequent reads stay on the fallback without further notices.
    selector.get_frame()?;
    assert!(speech.shutdown(Duration::from_secs(5)));

    let spoken = transcript.spoken.lock().unwrap().clone();
    assert_eq!(
        spoken,
        vec![
            "Connecting to ESP32 camera at 127.0.0.1.",
            "Attempting to reconnect to ESP32 camera at 127.0.0.1...",
            "Falling back to local webcam stub://bench.",
            "Connecting to local webcam stub://bench.",
        ]
    );
    Ok(())
}

#[test]
fn speech_is_spoken_in_order_without_overlap() -> anyhow::Result<()> {
    let transcript = Transcript {
        delay: Duration::from_millis(20),
        ..Transcript::default()
    };
    let speech = SpeechSink::spawn(Box::new(transcript.clone()))?;
    let announcer = speech.announcer();

    let started = Instant::now();
    speech.enqueue("T1");
    announcer.say("T2");
    speech.enqueue("T3");
    assert!(
        started.elapsed() < Duration::from_millis(20),
        "enqueue never waits on playback"
    );

    assert!(speech.shutdown(Duration::from_secs(5)));
    assert_eq!(*transcript.spoken.lock().unwrap(), vec!["T1", "T2", "T3"]);
    assert!(!transcript.overlapped.load(Ordering::SeqCst));
    Ok(())
}
