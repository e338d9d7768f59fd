//! Property tests for identifier allocation and flow-control accounting.

mod common;

use common::{PIPE, ignore_stream, raw_peer, spawn_session};
use futures::{SinkExt, StreamExt};
use proptest::prelude::*;
use tokio::{
    io::duplex,
    task::JoinSet,
    time::{Duration, timeout},
};
use wiremux::{ControlFlags, Frame, Headers, Role, SessionConfig, StreamError};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// However many tasks race on `open`, the identifiers they get are
    /// exactly 1, 3, 5, ... — odd parity, no duplicates, no gaps.
    #[test]
    fn identifiers_are_unique_gapless_and_parity_fixed(count in 1usize..12) {
        let ids = runtime().block_on(async move {
            let (client_end, server_end) = duplex(PIPE);
            let _server = spawn_session(
                server_end,
                Role::Server,
                SessionConfig::new(),
                ignore_stream,
            );
            let (client, _task) = spawn_session(
                client_end,
                Role::Client,
                SessionConfig::new(),
                ignore_stream,
            );

            let mut opens = JoinSet::new();
            for _ in 0..count {
                let client = client.clone();
                opens.spawn(async move {
                    let stream = client
                        .open(Headers::new(), ControlFlags::empty())
                        .await
                        .expect("open");
                    // a write forces identifier assignment to complete
                    stream.write(b"x").await.expect("write");
                    stream.id().expect("assigned")
                });
            }
            let mut ids = Vec::new();
            while let Some(id) = opens.join_next().await {
                ids.push(id.expect("join"));
            }
            ids.sort_unstable();
            ids
        });

        let expected: Vec<u32> = (0..ids.len())
            .map(|i| 1 + 2 * u32::try_from(i).expect("small count"))
            .collect();
        prop_assert_eq!(ids, expected);
    }

    /// Cumulative bytes sent never exceed cumulative credit granted, and
    /// every byte arrives exactly once, for any payload and window size.
    #[test]
    fn bytes_sent_never_exceed_credit_granted(window in 1u32..16, len in 0usize..200) {
        let payload: Vec<u8> = (0..len).map(|i| u8::try_from(i % 251).expect("fits")).collect();
        let expected = payload.clone();

        let (sizes, received, written) = runtime().block_on(async move {
            let (client_end, server_end) = duplex(PIPE);
            let config = SessionConfig::new().with_initial_window(window);
            let (client, _task) = spawn_session(client_end, Role::Client, config, ignore_stream);
            let mut peer = raw_peer(server_end);

            let stream = client
                .open(Headers::new(), ControlFlags::empty())
                .await
                .expect("open");
            let writer = tokio::spawn(async move { stream.write(&payload).await });

            let mut sizes = Vec::new();
            let mut received = Vec::new();
            let mut credit = i64::from(window);
            while received.len() < len {
                let frame = timeout(Duration::from_secs(5), peer.next())
                    .await
                    .expect("peer timed out")
                    .expect("connection ended")
                    .expect("decode");
                match frame {
                    Frame::SynStream { .. } => {}
                    Frame::Data { stream_id, payload, .. } => {
                        sizes.push(payload.len());
                        received.extend_from_slice(&payload);
                        credit -= i64::try_from(payload.len()).expect("small frame");
                        if credit <= 0 {
                            peer.send(Frame::WindowUpdate {
                                stream_id,
                                delta: window,
                            })
                            .await
                            .expect("grant credit");
                            credit += i64::from(window);
                        }
                    }
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
            let written = timeout(Duration::from_secs(5), writer)
                .await
                .expect("writer timed out")
                .expect("join");
            (sizes, received, written)
        });

        // replay the credit ledger: no chunk may overdraw it
        let mut credit = i64::from(window);
        for &size in &sizes {
            prop_assert!(i64::try_from(size).expect("small frame") <= credit);
            credit -= i64::try_from(size).expect("small frame");
            if credit <= 0 {
                credit += i64::from(window);
            }
        }
        prop_assert_eq!(received, expected);
        prop_assert_eq!(written, Ok::<usize, StreamError>(len));
    }
}
