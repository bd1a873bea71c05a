// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

mod mock;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use tokio_dongle::{
    Channel, Config, DeviceInterface, Error, ExceptionCode, Mode, Protocol, QueueStatus,
    RequestOptions, SoftwareRevision, Unit,
};

use crate::mock::{dongle, pdus, response_frame, spawn_device, spawn_echo_device, MockLink};

#[tokio::test]
async fn execute_resolves_with_response() -> anyhow::Result<()> {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_device(link.clone(), writes, |req| match req.pdu[0] {
        0x45 => Some(vec![0x45, 0xAA, 0xBB]),
        _ => Some(req.pdu.clone()),
    });

    let rsp = dongle.read_memory(Unit(1), 0x0010, 2).await?;
    assert_eq!(&rsp[..], &[0xAA, 0xBB]);

    let rsp = dongle
        .execute(
            Unit::dongle(),
            Bytes::from_static(&[0x47, 0x01, 0x01]),
            RequestOptions::default(),
        )
        .await?;
    assert_eq!(&rsp[..], &[0x47, 0x01, 0x01]);

    let requests = journal.lock().unwrap().clone();
    assert_eq!(requests[0].transaction_id, 1);
    assert_eq!(requests[0].unit_id, 0x01);
    assert_eq!(requests[0].pdu, vec![0x45, 0x00, 0x10, 0x02]);
    assert_eq!(requests[1].transaction_id, 2);
    assert_eq!(requests[1].unit_id, 0xFE);
    assert_eq!(dongle.status(), QueueStatus::default());
    Ok(())
}

#[tokio::test]
async fn convenience_calls() -> anyhow::Result<()> {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_device(link.clone(), writes, |req| match req.pdu[0] {
        0x43 => Some(vec![0x43, req.pdu[1], 0x01, 0x02, 0x03]),
        0x44 => Some(vec![0x44, 0x00]),
        _ => Some(req.pdu.clone()),
    });

    assert_eq!(&dongle.read_object(Unit(2), 0x05).await?[..], &[0x01, 0x02, 0x03]);
    assert_eq!(dongle.write_object(Unit(2), 0x05, &[0xAB]).await?, 0x00);
    dongle.write_memory(Unit(2), 0x0100, &[0x01, 0x02]).await?;
    dongle.write_verify_memory(Unit(2), 0x0100, &[0x03]).await?;
    dongle.configure().await?;
    dongle.configure_i2c().await?;
    dongle.keyswitch(true).await?;
    dongle.keyswitch(false).await?;

    assert_eq!(
        pdus(&journal),
        vec![
            vec![0x43, 0x05],
            vec![0x44, 0x05, 0x01, 0xAB],
            vec![0x46, 0x01, 0x00, 0x01, 0x02],
            vec![0x64, 0x01, 0x00, 0x03],
            vec![0x47, 0x00],
            vec![0x47, 0x00, 0x04, 0x01, 0x00, 0x00],
            vec![0x47, 0x01, 0x01],
            vec![0x47, 0x01, 0x00],
        ]
    );
    Ok(())
}

#[tokio::test]
async fn oversized_payloads_are_rejected() -> anyhow::Result<()> {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_device(link.clone(), writes, |req| Some(vec![req.pdu[0], 0x00]));

    let err = dongle
        .write_object(Unit(2), 0x05, &[0xAB; 256])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::PayloadTooLarge {
            max: 255,
            actual: 256
        }
    ));

    let err = dongle
        .execute(
            Unit(2),
            Bytes::from(vec![0x46; 0xFFFF]),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { max: 0xFFFE, .. }));
    assert!(pdus(&journal).is_empty());
    assert_eq!(dongle.status(), QueueStatus::default());

    assert_eq!(dongle.write_object(Unit(2), 0x05, &[0xAB; 255]).await?, 0x00);
    let pdus = pdus(&journal);
    assert_eq!(pdus.len(), 1);
    assert_eq!(&pdus[0][..3], &[0x44, 0x05, 0xFF]);
    assert_eq!(pdus[0].len(), 258);
    Ok(())
}

#[tokio::test]
async fn retryable_exception_is_retried() -> anyhow::Result<()> {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let mut busy = 2;
    let journal = spawn_device(link.clone(), writes, move |req| {
        if busy > 0 {
            busy -= 1;
            Some(vec![req.pdu[0] | 0x80, 0x06])
        } else {
            Some(vec![0x45, 0x2A])
        }
    });

    let rsp = dongle.read_memory(Unit(1), 0x0061, 1).await?;
    assert_eq!(&rsp[..], &[0x2A]);

    let requests = journal.lock().unwrap().clone();
    assert_eq!(requests.len(), 3);
    // Every attempt is sent with a new transaction id
    assert_eq!(
        requests.iter().map(|req| req.transaction_id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_reject_with_last_exception() {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_device(link.clone(), writes, |_| Some(vec![0xC5, 0x04]));

    let err = dongle.read_memory(Unit(1), 0x0061, 1).await.unwrap_err();
    assert_eq!(
        err.exception().map(|rsp| rsp.exception),
        Some(ExceptionCode::SlaveDeviceFailure)
    );
    // One attempt plus two retries
    assert_eq!(journal.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn other_exceptions_reject_immediately() {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_device(link.clone(), writes, |_| Some(vec![0xC5, 0x02]));

    let err = dongle.read_memory(Unit(1), 0x0061, 1).await.unwrap_err();
    assert!(matches!(err, Error::Exception(_)));
    assert_eq!(
        err.exception().map(|rsp| rsp.exception),
        Some(ExceptionCode::IllegalDataAddress)
    );
    assert_eq!(journal.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn retry_set_can_be_overridden_per_request() {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_device(link.clone(), writes, |_| Some(vec![0xC7, 0x06]));

    let err = dongle
        .execute(
            Unit::dongle(),
            Bytes::from_static(&[0x47, 0x04]),
            RequestOptions::default().with_retry_on_exception(vec![]),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.exception().map(|rsp| rsp.exception),
        Some(ExceptionCode::SlaveDeviceBusy)
    );
    assert_eq!(journal.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn response_in_single_bytes() -> anyhow::Result<()> {
    let (link, mut writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;

    let request = {
        let dongle = dongle.clone();
        tokio::spawn(async move { dongle.read_memory(Unit(3), 0x0200, 2).await })
    };
    let adu = writes.recv().await.unwrap();
    let req = mock::parse_request(&adu);
    for byte in response_frame(req.transaction_id, 3, &[0x45, 0x12, 0x34]) {
        assert!(link.notify(Channel::Rx, &[byte]));
    }
    assert_eq!(&request.await??[..], &[0x12, 0x34]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_rejects() {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_device(link.clone(), writes, |_| None);

    let err = dongle
        .execute(
            Unit(1),
            Bytes::from_static(&[0x45, 0x00, 0x00, 0x01]),
            RequestOptions::default()
                .with_max_retries(1)
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TimedOut));
    assert_eq!(journal.lock().unwrap().len(), 2);
    assert_eq!(dongle.status(), QueueStatus::default());
}

#[tokio::test(start_paused = true)]
async fn late_response_is_ignored() -> anyhow::Result<()> {
    let (link, mut writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;

    let request = {
        let dongle = dongle.clone();
        tokio::spawn(async move {
            dongle
                .execute(
                    Unit(1),
                    Bytes::from_static(&[0x45, 0x00, 0x00, 0x01]),
                    RequestOptions::default()
                        .with_max_retries(0)
                        .with_timeout(Duration::from_millis(100)),
                )
                .await
        })
    };
    let req = mock::parse_request(&writes.recv().await.unwrap());
    assert!(matches!(request.await?, Err(Error::TimedOut)));

    link.notify(
        Channel::Rx,
        &response_frame(req.transaction_id, 1, &[0x45, 0x01]),
    );
    assert_eq!(dongle.status(), QueueStatus::default());

    // The pipeline still works afterwards
    let request = {
        let dongle = dongle.clone();
        tokio::spawn(async move { dongle.read_memory(Unit(1), 0x0000, 1).await })
    };
    let req = mock::parse_request(&writes.recv().await.unwrap());
    assert_eq!(req.transaction_id, 2);
    link.notify(
        Channel::Rx,
        &response_frame(req.transaction_id, 1, &[0x45, 0x07]),
    );
    assert_eq!(&request.await??[..], &[0x07]);
    Ok(())
}

#[tokio::test]
async fn retry_from_a_thread_without_runtime_times_out() -> anyhow::Result<()> {
    let (link, mut writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;

    let request = {
        let dongle = dongle.clone();
        tokio::spawn(async move {
            dongle
                .execute(
                    Unit(1),
                    Bytes::from_static(&[0x45, 0x00, 0x00, 0x01]),
                    RequestOptions::default()
                        .with_max_retries(1)
                        .with_timeout(Duration::from_millis(100)),
                )
                .await
        })
    };
    let req = mock::parse_request(&writes.recv().await.unwrap());

    // Link drivers may notify from their own threads
    let notifier = {
        let link = Arc::clone(&link);
        std::thread::spawn(move || {
            link.notify(
                Channel::Rx,
                &response_frame(req.transaction_id, 1, &[0xC5, 0x06]),
            )
        })
    };
    assert!(notifier.join().unwrap());

    let retry = mock::parse_request(&writes.recv().await.unwrap());
    assert_eq!(retry.transaction_id, 2);
    let outcome = tokio::time::timeout(Duration::from_secs(5), request).await??;
    assert!(matches!(outcome, Err(Error::TimedOut)));
    assert_eq!(dongle.status(), QueueStatus::default());
    Ok(())
}

#[tokio::test]
async fn invalid_unit_in_response_is_retried() -> anyhow::Result<()> {
    let (link, mut writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;

    let request = {
        let dongle = dongle.clone();
        tokio::spawn(async move { dongle.read_memory(Unit(1), 0x0000, 1).await })
    };
    let req = mock::parse_request(&writes.recv().await.unwrap());
    link.notify(
        Channel::Rx,
        &response_frame(req.transaction_id, 9, &[0x45, 0x01]),
    );
    let req = mock::parse_request(&writes.recv().await.unwrap());
    link.notify(
        Channel::Rx,
        &response_frame(req.transaction_id, 1, &[0x45, 0x02]),
    );
    assert_eq!(&request.await??[..], &[0x02]);
    Ok(())
}

#[tokio::test]
async fn concurrency_is_limited() -> anyhow::Result<()> {
    let (link, mut writes) = MockLink::new();
    let dongle = dongle(
        &link,
        Config {
            max_concurrent_requests: 2,
            ..Default::default()
        },
    )
    .await;

    let requests: Vec<_> = (0..5u8)
        .map(|index| {
            let dongle = dongle.clone();
            tokio::spawn(async move { dongle.read_memory(Unit(1), index.into(), 1).await })
        })
        .collect();
    while dongle.status().queued + dongle.status().pending < 5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        dongle.status(),
        QueueStatus {
            queued: 3,
            executing: 2,
            pending: 2,
        }
    );

    let mut answered = 0;
    while answered < 5 {
        let req = mock::parse_request(&writes.recv().await.unwrap());
        assert!(dongle.status().executing <= 2);
        link.notify(
            Channel::Rx,
            &response_frame(req.transaction_id, 1, &[0x45, req.pdu[2]]),
        );
        answered += 1;
    }
    for (index, request) in requests.into_iter().enumerate() {
        assert_eq!(&request.await??[..], &[u8::try_from(index)?]);
    }
    assert_eq!(dongle.status(), QueueStatus::default());
    Ok(())
}

#[tokio::test]
async fn overload_requeues_without_using_retries() -> anyhow::Result<()> {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let mut overloads = 1;
    let journal = spawn_device(link.clone(), writes, move |req| {
        if overloads > 0 {
            overloads -= 1;
            Some(vec![0xC5, 0x0A])
        } else {
            Some(vec![req.pdu[0], 0x01])
        }
    });

    let rsp = dongle
        .execute(
            Unit(1),
            Bytes::from_static(&[0x45, 0x00, 0x00, 0x01]),
            RequestOptions::default().with_max_retries(0),
        )
        .await?;
    assert_eq!(&rsp[..], &[0x45, 0x01]);
    assert_eq!(journal.lock().unwrap().len(), 2);

    // The device is assumed to be busy with an abandoned request until
    // its response arrives
    assert_eq!(dongle.status().executing, 1);
    link.notify(Channel::Rx, &response_frame(0x1000, 1, &[0x45, 0x00]));
    assert_eq!(dongle.status().executing, 0);
    Ok(())
}

#[tokio::test]
async fn overload_retries_can_be_bounded() {
    let (link, writes) = MockLink::new();
    let dongle = dongle(
        &link,
        Config {
            max_concurrent_requests: 10,
            max_overload_retries: Some(2),
            ..Default::default()
        },
    )
    .await;
    let journal = spawn_device(link.clone(), writes, |_| Some(vec![0xC5, 0x05]));

    let err = dongle.read_memory(Unit(1), 0x0000, 1).await.unwrap_err();
    assert_eq!(
        err.exception().map(|rsp| rsp.exception),
        Some(ExceptionCode::Acknowledge)
    );
    assert_eq!(journal.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn abandon_transactions() -> anyhow::Result<()> {
    let (link, mut writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;

    let request = {
        let dongle = dongle.clone();
        tokio::spawn(async move { dongle.read_memory(Unit(1), 0x0000, 1).await })
    };
    writes.recv().await.unwrap();
    assert_eq!(dongle.status().pending, 1);

    dongle.abandon_transactions();
    assert!(matches!(request.await?, Err(Error::Cancelled)));
    assert_eq!(dongle.status(), QueueStatus::default());
    Ok(())
}

#[tokio::test]
async fn destroy_cancels_everything() -> anyhow::Result<()> {
    let (link, mut writes) = MockLink::new();
    let dongle = dongle(
        &link,
        Config {
            max_concurrent_requests: 1,
            ..Default::default()
        },
    )
    .await;

    let requests: Vec<_> = (0..2)
        .map(|_| {
            let dongle = dongle.clone();
            tokio::spawn(async move { dongle.configure().await })
        })
        .collect();
    writes.recv().await.unwrap();
    while dongle.status().queued < 1 {
        tokio::task::yield_now().await;
    }

    dongle.destroy();
    for request in requests {
        assert!(matches!(request.await?, Err(Error::Cancelled)));
    }
    assert!(matches!(dongle.configure().await, Err(Error::Destroyed)));
    assert_eq!(dongle.status(), QueueStatus::default());
    Ok(())
}

#[tokio::test]
async fn connect_reads_dongle_info() -> anyhow::Result<()> {
    mock::init_logging();
    let (link, _writes) = MockLink::new();
    link.set_value(Channel::ModelNumber, b"CS1814");
    link.set_value(Channel::SerialNumber, b"00012345");
    link.set_value(Channel::FirmwareRevision, b"1.0");
    link.set_value(Channel::HardwareRevision, &[0x00]);
    link.set_value(Channel::SoftwareRevision, b"2.1.7");
    link.set_value(Channel::Manufacturer, b"Control Solutions");
    link.set_value(Channel::Product, &[]);

    let dongle = tokio_dongle::Dongle::connect(link.clone(), Config::default()).await?;
    assert!(link.is_subscribed(Channel::Rx));

    let info = dongle.info().unwrap();
    assert_eq!(info.model, "CS1814");
    assert_eq!(info.serial, "00012345");
    assert_eq!(info.hardware, "");
    assert_eq!(info.manufacturer, "Control Solutions");
    assert_eq!(info.product, "");
    assert_eq!(
        dongle.software_revision(),
        Some(SoftwareRevision {
            major: 2,
            minor: 1,
            patch: 7
        })
    );
    assert_eq!(dongle.software_revision().unwrap().scalar(), 0x02_01_07);
    Ok(())
}

#[tokio::test]
async fn connect_fails_if_a_characteristic_is_missing() {
    mock::init_logging();
    let (link, _writes) = MockLink::new();
    link.set_value(Channel::ModelNumber, b"CS1814");
    let err = tokio_dongle::Dongle::connect(link, Config::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn device_interface() -> anyhow::Result<()> {
    let (link, writes) = MockLink::new();
    let dongle = dongle(&link, Config::default()).await;
    let journal = spawn_echo_device(link.clone(), writes);

    link.set_value(Channel::Interface, &[0x00]);
    let interface = dongle.read_interface().await?;
    assert_eq!(interface.mode, Mode::I2c);
    assert!(interface.status.up);

    let updates = Arc::new(Mutex::new(Vec::<DeviceInterface>::new()));
    {
        let updates = Arc::clone(&updates);
        dongle
            .on_interface_update(move |interface| updates.lock().unwrap().push(interface))
            .await?;
    }
    link.notify(Channel::Interface, &[0x08, 0x03, 0x01, 0x00]);
    link.notify(Channel::Interface, &[0x08, 0x03]);
    let updates = updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].mode, Mode::Uart);
    assert_eq!(updates[0].protocol, Protocol::Serial);
    assert!(updates[0].status.up);
    assert_eq!(updates[1], DeviceInterface::default());

    dongle.configure_interface(Mode::Canbus, Protocol::J1939).await?;
    assert_eq!(pdus(&journal), vec![vec![0x47, 0x00, 0x10, 0x02, 0x00, 0x00]]);
    Ok(())
}
