//! Simulator → tracker → listener → TCP client.

use atracsys_igtl::protocol;
use atracsys_igtl::{ConnectionListener, GeometryLoader, InitOptions, SimulatorBackend, Tracker};
use std::net::TcpStream;
use std::time::{Duration, Instant};

fn write_geometry(dir: &std::path::Path, file: &str, id: u32) {
    std::fs::write(
        dir.join(file),
        format!(
            "[geometry]\ncount=4\nid={}\n\
             [fiducial0]\nx=0\ny=0\nz=0\n\
             [fiducial1]\nx=78.7\ny=0\nz=0\n\
             [fiducial2]\nx=28.1\ny=-56.2\nz=0\n\
             [fiducial3]\nx=122.7\ny=-38.5\nz=0\n",
            id
        ),
    )
    .unwrap();
}

#[test]
fn markers_reach_igtl_client() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    write_geometry(dir.path(), "geometry002.ini", 2);
    write_geometry(dir.path(), "geometry003.ini", 3);

    let options = InitOptions {
        geometry_loader: GeometryLoader::default().with_dir(dir.path()),
        ..InitOptions::default()
    };
    let mut tracker = Tracker::init(Box::new(SimulatorBackend::new()), options).unwrap();
    tracker.add_geometry("geometry002.ini", "Pointer").unwrap();
    tracker.add_geometry("geometry003.ini", "Ultrasound").unwrap();
    tracker.start_tracking().unwrap();

    let listener = ConnectionListener::bind("127.0.0.1:0", Duration::from_secs(10)).unwrap();
    let mut client = TcpStream::connect(listener.local_addr()).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while listener.connection_count() == 0 {
        assert!(Instant::now() < deadline, "client never accepted");
        std::thread::sleep(Duration::from_millis(10));
    }

    let stream = tracker.into_stream(Duration::from_millis(5)).unwrap();
    for _ in 0..3 {
        let sample = stream.recv_timeout(Duration::from_secs(2)).unwrap();
        let packet = protocol::pack("AtracsysTracker", sample.timestamp, &sample.markers).unwrap();
        assert_eq!(listener.send(&packet), 1);

        let received = protocol::read_tracking_message(&mut client).unwrap();
        let sent_at = protocol::timestamp(sample.timestamp);
        assert_eq!(received.header.timestamp.seconds, sent_at.seconds);
        assert_eq!(received.header.timestamp.fraction, sent_at.fraction);

        let elements = &received.content.elements;
        let names: Vec<&str> = elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Pointer", "Ultrasound"]);
        for (element, marker) in elements.iter().zip(&sample.markers) {
            assert_eq!(element.matrix[0], marker.transform[0]);
            assert_eq!(element.matrix[2], marker.transform[2]);
            assert!(element.matrix[2][3] >= 1000.0);
        }
    }

    stream.stop();
}
