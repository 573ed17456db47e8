//! Route decoded envelopes: file chunks feed the transfer engine, everything
//! else surfaces as a `MessageReceived` event for the UI layer.

use std::net::IpAddr;
use std::sync::Arc;

use lanlink_core::{Envelope, Event, MessageKind};

use crate::node::NodeState;
use crate::transfer;

pub async fn dispatch(state: &Arc<NodeState>, addr: IpAddr, envelope: Envelope) {
    match envelope {
        Envelope::FileChunk {
            transfer_id,
            chunk_data,
            chunk_index,
            total_chunks,
            file_size,
            filename,
        } => {
            transfer::ingest_chunk(
                state,
                addr,
                transfer_id,
                &chunk_data,
                chunk_index,
                total_chunks,
                file_size,
                filename,
            )
            .await;
        }
        Envelope::Text {
            content, timestamp, ..
        } => emit(state, addr, MessageKind::Text, content, timestamp),
        Envelope::Image {
            content, timestamp, ..
        } => emit(state, addr, MessageKind::Image, content, timestamp),
        Envelope::File {
            content, timestamp, ..
        } => emit(state, addr, MessageKind::File, content, timestamp),
        Envelope::FileCompleted { content, timestamp } => {
            emit(state, addr, MessageKind::FileCompleted, content, timestamp)
        }
        Envelope::FileError { content, timestamp } => {
            emit(state, addr, MessageKind::FileError, content, timestamp)
        }
    }
}

fn emit(state: &NodeState, addr: IpAddr, kind: MessageKind, content: String, timestamp: String) {
    state.emit(Event::MessageReceived {
        addr,
        kind,
        content,
        timestamp,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::test_state;

    #[tokio::test]
    async fn non_chunk_envelopes_become_message_events() {
        let (state, mut rx) = test_state("node");
        let addr: IpAddr = "10.1.1.1".parse().unwrap();

        dispatch(&state, addr, Envelope::image("cat.png", None)).await;
        dispatch(&state, addr, Envelope::file_error("disk full")).await;

        match rx.try_recv().unwrap() {
            Event::MessageReceived { kind, content, .. } => {
                assert_eq!(kind, MessageKind::Image);
                assert_eq!(content, "cat.png");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            Event::MessageReceived { kind, content, .. } => {
                assert_eq!(kind, MessageKind::FileError);
                assert_eq!(content, "disk full");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_chunk_feeds_transfer_engine() {
        let (state, _rx) = test_state("node");
        let addr: IpAddr = "10.1.1.1".parse().unwrap();
        let chunk = lanlink_core::chunk::chunk_envelope(
            lanlink_core::TransferId::random(),
            "big.bin",
            20_000,
            0,
            3,
            &[7u8; 8192],
        );
        dispatch(&state, addr, chunk).await;
        assert_eq!(state.inbound.lock().await.len(), 1);
    }
}
