// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use hotpokt_testing::{
    test_builder::TestDescription,
    test_helpers::{wait_for_event, EVENT_TIMEOUT},
};
use hotpokt_types::{
    event::{Event, NodeState},
    logging::setup_logging,
    message::{ConsensusMessage, DebugMessage},
    validator::NodeId,
    view::{Step, View},
};

#[tokio::test(flavor = "multi_thread")]
async fn reset_to_genesis_twice_is_the_same_as_once() {
    setup_logging();
    let description = TestDescription {
        num_nodes: 1,
        ..TestDescription::default()
    };
    let mut network = description.launch(true).await.unwrap();
    let node = &mut network.nodes[0];

    node.debug(DebugMessage::TriggerNextView).await;
    assert!(wait_for_event(&mut node.events, EVENT_TIMEOUT, |event| {
        matches!(event, Event::NewRoundBroadcast { .. })
    })
    .await
    .is_some());

    node.debug(DebugMessage::ResetToGenesis).await;
    node.debug(DebugMessage::ResetToGenesis).await;
    node.debug(DebugMessage::PrintNodeState).await;
    let state = wait_for_event(&mut node.events, EVENT_TIMEOUT, |event| {
        matches!(event, Event::NodeState(_))
    })
    .await;
    assert_eq!(
        state,
        Some(Event::NodeState(NodeState {
            node_id: NodeId(1),
            height: 0,
            round: 0,
            step: Step::NewRound,
            is_leader: false,
            leader_id: None,
        }))
    );
    assert_eq!(node.handle.chain_snapshot().latest_height, 0);

    // the node starts over from the first height
    node.debug(DebugMessage::TriggerNextView).await;
    let restarted = wait_for_event(&mut node.events, EVENT_TIMEOUT, |event| {
        matches!(event, Event::NewRoundBroadcast { .. })
    })
    .await;
    assert_eq!(
        restarted,
        Some(Event::NewRoundBroadcast {
            view: View::new(1, 0, Step::NewRound)
        })
    );

    network.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn envelopes_are_routed_by_tag() {
    setup_logging();
    let description = TestDescription {
        num_nodes: 1,
        mempool: vec![],
        ..TestDescription::default()
    };
    let mut network = description.launch(true).await.unwrap();
    let node = &mut network.nodes[0];

    // transactions go to the mempool, empty ones are refused there
    let tx = ConsensusMessage::Transaction(b"pay alice".to_vec());
    node.handle.dispatch(&tx.encode().unwrap()).await.unwrap();
    node.handle
        .dispatch_message(ConsensusMessage::Transaction(vec![]))
        .await;
    assert!(node.handle.dispatch(&[0xff, 0xfe]).await.is_err());

    // commands are processed in order, so the state report comes after both transactions
    node.debug(DebugMessage::PrintNodeState).await;
    assert!(wait_for_event(&mut node.events, EVENT_TIMEOUT, |event| {
        matches!(event, Event::NodeState(_))
    })
    .await
    .is_some());
    assert_eq!(node.utility.mempool(), vec![b"pay alice".to_vec()]);

    network.shut_down().await;
}
