use std::time::Duration;
use t3awg::{
    sim::SimulatedAwg, ChannelConfig, ChannelId, ConnectionError, ErrorQueueEntry, InstrumentLimits,
    OutputState, ResourceAddress, RunState, SamplingRate, Session, SessionConfig, SessionError,
    ValidationError, Voltage,
};
use tokio::net::TcpListener;

/// Serves one simulated instrument on a loopback port.
async fn listen(sim: SimulatedAwg) -> ResourceAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let sim = sim.clone();
            tokio::spawn(async move { sim.serve(stream).await });
        }
    });

    ResourceAddress::new("127.0.0.1", port)
}

fn config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(500),
        min_pause: Duration::ZERO,
        ..Default::default()
    }
}

async fn open(sim: &SimulatedAwg) -> Session {
    let address = listen(sim.clone()).await;
    Session::open_with_config(&address, config()).await.unwrap()
}

#[tokio::test]
async fn open_by_visa_address() {
    let sim = SimulatedAwg::new();
    let address = listen(sim).await;

    let resource = format!("TCPIP0::{}::{}::SOCKET", address.host, address.port);
    let mut session = Session::open(&resource, Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.identity().manufacturer, "Teledyne LeCroy");
    session.close().await.unwrap();
}

#[tokio::test]
async fn open_refused() {
    // grab a free port, then release it so nothing listens there
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let address = ResourceAddress::new("127.0.0.1", port);
    let err = Session::open_with_config(&address, config())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Connect { .. }));
}

#[tokio::test]
async fn open_bad_address() {
    let err = Session::open("GPIB0::7::INSTR", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Address { .. }));
}

#[tokio::test]
async fn configure_then_read_back() {
    let sim = SimulatedAwg::new();
    let mut session = open(&sim).await;

    let config = ChannelConfig {
        amplitude: Voltage(1.2),
        offset: Voltage(-0.3),
        frequency: None,
        sample_rate: SamplingRate(250e6),
    };
    session.configure_channel(ChannelId::CH1, config).await.unwrap();
    session.enable_output(ChannelId::CH1, true).await.unwrap();

    let readback = session.query_channel(ChannelId::CH1).await.unwrap();
    assert!((readback.amplitude.0 - 1.2).abs() < 1e-9);
    assert!((readback.offset.0 + 0.3).abs() < 1e-9);
    assert_eq!(readback.sample_rate, SamplingRate(250e6));
    assert_eq!(readback.output, OutputState::On);
}

#[tokio::test]
async fn invalid_channel_sends_nothing() {
    let sim = SimulatedAwg::new();
    let mut session = open(&sim).await;
    let sent = sim.snapshot().received.len();

    for channel in [ChannelId(0), ChannelId(3)] {
        let err = session.enable_output(channel, true).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation {
                source: ValidationError::ChannelOutOfRange { .. }
            }
        ));
    }

    assert_eq!(sim.snapshot().received.len(), sent);
}

#[tokio::test]
async fn out_of_range_channel_rejects_configure_and_upload() {
    let sim = SimulatedAwg::new();
    let mut session = open(&sim).await;
    let sent = sim.snapshot().received.len();

    for channel in [ChannelId(0), ChannelId(3)] {
        let err = session
            .configure_channel(channel, ChannelConfig::default())
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                SessionError::Validation {
                    source: ValidationError::ChannelOutOfRange { .. }
                }
            ),
            "configure {channel}: {err:?}"
        );

        let err = session
            .upload_waveform(channel, &[0.0, 0.5, -0.5])
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                SessionError::Validation {
                    source: ValidationError::ChannelOutOfRange { .. }
                }
            ),
            "upload {channel}: {err:?}"
        );
    }

    let state = sim.snapshot();
    assert_eq!(state.received.len(), sent);
    assert_eq!(state.block_bytes, 0);
}

#[tokio::test]
async fn oversized_waveform_is_never_transferred() {
    let sim = SimulatedAwg::new();
    let address = listen(sim.clone()).await;
    let config = SessionConfig {
        query_limits: false,
        limits: InstrumentLimits {
            max_waveform_len: 1000,
            ..Default::default()
        },
        ..config()
    };
    let mut session = Session::open_with_config(&address, config).await.unwrap();

    let samples = vec![0.0; 1001];
    let err = session
        .upload_waveform(ChannelId::CH1, &samples)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Capacity { .. }));
    assert_eq!(sim.snapshot().block_bytes, 0);

    session
        .upload_waveform(ChannelId::CH1, &samples[..1000])
        .await
        .unwrap();
    assert_eq!(sim.snapshot().waveforms["temp1"].len(), 1000);
}

#[tokio::test]
async fn large_waveform_round_trip() {
    let sim = SimulatedAwg::new();
    let mut session = open(&sim).await;

    let samples: Vec<f64> = (0..4096)
        .map(|i| (i as f64 * std::f64::consts::TAU / 4096.0).sin())
        .collect();
    session
        .upload_waveform(ChannelId::CH2, &samples)
        .await
        .unwrap();

    let state = sim.snapshot();
    assert_eq!(state.waveforms["temp2"], samples);
    assert_eq!(state.channels[1].waveform.as_deref(), Some("temp2"));
}

#[tokio::test]
async fn instrument_errors_surface() {
    let sim = SimulatedAwg::new();
    let mut session = open(&sim).await;

    assert_eq!(session.query_error().await.unwrap(), ErrorQueueEntry::NoError);

    sim.inject_error(-222, "Data out of range");
    assert_eq!(
        session.query_error().await.unwrap(),
        ErrorQueueEntry::Error {
            code: -222,
            message: "Data out of range".to_owned()
        }
    );

    // picked up by the next setting's acknowledgement
    sim.inject_error(-221, "Settings conflict");
    let err = session
        .enable_output(ChannelId::CH2, true)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Instrument { ref source } if source.code == -221));
}

#[tokio::test]
async fn run_and_stop() {
    let sim = SimulatedAwg::new();
    let mut session = open(&sim).await;

    session.run().await.unwrap();
    assert_eq!(session.run_state().await.unwrap(), RunState::Running);
    session.stop().await.unwrap();
    assert_eq!(session.run_state().await.unwrap(), RunState::Stopped);
}

#[tokio::test]
async fn closed_session() {
    let sim = SimulatedAwg::new();
    let mut session = open(&sim).await;

    session.close().await.unwrap();
    session.close().await.unwrap();

    assert!(matches!(
        session
            .configure_channel(ChannelId::CH1, ChannelConfig::default())
            .await,
        Err(SessionError::NotOpen)
    ));
    assert!(matches!(
        session.upload_waveform(ChannelId::CH1, &[0.0]).await,
        Err(SessionError::NotOpen)
    ));
    assert!(session.channel(ChannelId::CH1).is_some_and(|c| c.config.is_none()));
}
