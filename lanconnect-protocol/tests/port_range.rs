//! Payload port range exhaustion
//!
//! Lives in its own test binary: holding every payload port would starve
//! the transfers running concurrently in the other test suites.

use lanconnect_protocol::payload::{MAX_PORT, MIN_PORT};
use lanconnect_protocol::{
    BytesSource, DeviceIdentity, JobError, JobState, LanLinkProvider, MemoryTrustStore,
    ProtocolError, UploadJob,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

/// Bind every port of the payload range, waiting out brief holders
fn hold_payload_ports() -> Vec<TcpListener> {
    (MIN_PORT..=MAX_PORT)
        .map(|port| {
            let mut attempts = 0;
            loop {
                match TcpListener::bind(("0.0.0.0", port)) {
                    Ok(listener) => break listener,
                    Err(e) if attempts < 50 => {
                        attempts += 1;
                        eprintln!("port {} busy ({}), retrying", port, e);
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    Err(e) => panic!("cannot hold port {}: {}", port, e),
                }
            }
        })
        .collect()
}

#[tokio::test]
async fn test_every_port_taken() {
    let held = hold_payload_ports();
    assert_eq!(held.len(), 26);

    let identity = DeviceIdentity::generate("sender").expect("identity");
    let provider =
        Arc::new(LanLinkProvider::new(&identity, Arc::new(MemoryTrustStore::new())).unwrap());

    let mut job = UploadJob::new("receiver", BytesSource::new(b"payload".to_vec()), provider);
    let error = job.start().unwrap_err();

    assert!(matches!(
        error,
        ProtocolError::Transfer(JobError::NoAvailablePort)
    ));
    assert_eq!(job.state(), &JobState::Failed(JobError::NoAvailablePort));
    assert_eq!(job.port(), None);
    assert!(job.transfer_info().is_err());
    assert_eq!(job.run().await, Err(JobError::NoAvailablePort));
    assert_eq!(JobError::NoAvailablePort.code(), 1);

    drop(held);
}
