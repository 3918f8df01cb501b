//! End-to-end escalation scenarios: specialist output in, farmer guidance out.

use farmpilot::escalation::{
    CaseState, CaseStore, EscalationCoordinator, NotificationSweep, Requester,
    ResponseReconciler,
};
use farmpilot::gateway::{
    ChannelId, Gateway, GatewayError, GatewayMessage, ImageRef, MessageRef,
};
use farmpilot::pipeline::{FarmerMessage, RequestPipeline};
use farmpilot::specialist::{Specialist, SpecialistError};

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

const VET_GROUP: ChannelId = ChannelId(-100500);
const FARMER_CHAT: ChannelId = ChannelId(10001);

const FMD_RESPONSE: &str = "[EMERGENCY_VET_REVIEW_REQUIRED]\n\
    DISEASE: Foot-and-Mouth Disease\n\
    SEVERITY: CRITICAL\n\
    CONFIDENCE: HIGH\n\
    REASONING: Vesicular lesions observed.\n\
    [END_EMERGENCY]\n\
    Isolate the animal immediately.";

#[derive(Debug, Clone)]
struct Sent {
    channel: ChannelId,
    text: String,
}

/// In-memory two-channel gateway: records sends, serves scripted inbound
/// messages, and can fail sends on demand.
#[derive(Default)]
struct FakeGateway {
    sent: Mutex<Vec<Sent>>,
    send_failures: Mutex<VecDeque<GatewayError>>,
    inbound: Mutex<Vec<(i64, GatewayMessage)>>,
    next_message_id: AtomicI64,
    next_update_id: AtomicI64,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            next_update_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    async fn fail_next_send(&self, error: GatewayError) {
        self.send_failures.lock().await.push_back(error);
    }

    async fn push_reply(&self, reply_to: MessageRef, sender_name: &str, text: &str) {
        let update_id = self.next_update_id.fetch_add(1, Ordering::SeqCst);
        self.inbound.lock().await.push((
            update_id,
            GatewayMessage {
                id: MessageRef(update_id + 1000),
                channel: VET_GROUP,
                sender_id: "777".to_string(),
                sender_name: sender_name.to_string(),
                text: text.to_string(),
                reply_to: Some(reply_to),
                image: None,
            },
        ));
    }

    async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn send_message(
        &self,
        channel: ChannelId,
        text: &str,
        _image: Option<&ImageRef>,
    ) -> Result<MessageRef, GatewayError> {
        if let Some(error) = self.send_failures.lock().await.pop_front() {
            return Err(error);
        }

        self.sent.lock().await.push(Sent {
            channel,
            text: text.to_string(),
        });
        Ok(MessageRef(self.next_message_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn fetch_new_messages(
        &self,
        cursor: i64,
    ) -> Result<(Vec<GatewayMessage>, i64), GatewayError> {
        let inbound = self.inbound.lock().await;
        let mut next_cursor = cursor;
        let mut messages = Vec::new();
        for (update_id, message) in inbound.iter() {
            if *update_id >= cursor {
                next_cursor = next_cursor.max(update_id + 1);
                messages.push(message.clone());
            }
        }
        Ok((messages, next_cursor))
    }
}

struct FixedSpecialist(String);

#[async_trait]
impl Specialist for FixedSpecialist {
    async fn generate(
        &self,
        _conversation_ref: &str,
        _query: &str,
        _image: Option<&ImageRef>,
    ) -> Result<String, SpecialistError> {
        Ok(self.0.clone())
    }
}

async fn test_store() -> CaseStore {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    CaseStore::new(pool)
}

fn farmer_message() -> FarmerMessage {
    FarmerMessage {
        channel: FARMER_CHAT,
        sender: Requester {
            id: "10001".to_string(),
            name: "Amina".to_string(),
        },
        conversation_ref: "telegram-10001".to_string(),
        text: "my cow has blisters on its mouth and is drooling".to_string(),
        image: None,
    }
}

#[tokio::test]
async fn emergency_runs_from_detection_to_farmer_notification() {
    let store = test_store().await;
    let expert_gateway = Arc::new(FakeGateway::new());
    let farmer_gateway = Arc::new(FakeGateway::new());

    let coordinator = Arc::new(EscalationCoordinator::new(
        store.clone(),
        expert_gateway.clone(),
        VET_GROUP,
    ));
    let pipeline = RequestPipeline::new(
        Arc::new(FixedSpecialist(FMD_RESPONSE.to_string())),
        Some(coordinator),
    );

    // 1. Farmer request: case created, posted to the vet group, farmer
    //    acknowledged with the case id and the visible instructions.
    let reply = pipeline.handle_farmer_message(&farmer_message()).await;
    assert!(reply.contains("Suspected Disease: Foot-and-Mouth Disease"));
    assert!(reply.contains("Isolate the animal immediately."));

    let case = store
        .list_in_state(CaseState::AwaitingExpert)
        .await
        .expect("list")
        .pop()
        .expect("one case");
    assert!(reply.contains(&case.case_id));

    let notice_ref = case.expert_message_ref.expect("posted");
    let posted = expert_gateway.sent().await;
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].channel, VET_GROUP);
    assert!(posted[0].text.contains("Vesicular lesions observed."));

    // 2. A vet replies to the case notice; the reconciler records it.
    expert_gateway
        .push_reply(notice_ref, "Okafor", "Start antiviral protocol X")
        .await;
    let mut reconciler = ResponseReconciler::new(store.clone(), expert_gateway.clone());
    reconciler.poll_once().await.expect("poll");

    let case = store.get(&case.case_id).await.expect("get").expect("exists");
    assert_eq!(case.state, CaseState::ExpertResponded);
    assert_eq!(
        case.expert_response_text.as_deref(),
        Some("Start antiviral protocol X")
    );

    // 3. The sweep relays the answer to the farmer and closes the case.
    let sweep = NotificationSweep::new(store.clone(), farmer_gateway.clone());
    sweep.sweep_once().await.expect("sweep");

    let case = store.get(&case.case_id).await.expect("get").expect("exists");
    assert_eq!(case.state, CaseState::Completed);

    let notified = farmer_gateway.sent().await;
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].channel, FARMER_CHAT);
    assert!(notified[0].text.contains("Start antiviral protocol X"));
    assert!(notified[0].text.contains("Dr. Okafor"));

    // 4. Re-running the sweep does not re-send.
    sweep.sweep_once().await.expect("sweep");
    assert_eq!(farmer_gateway.sent().await.len(), 1);
}

#[tokio::test]
async fn relocated_expert_channel_is_retried_and_cached() {
    let store = test_store().await;
    let expert_gateway = Arc::new(FakeGateway::new());
    let new_group = ChannelId(-200900);

    expert_gateway
        .fail_next_send(GatewayError::ChannelRelocated {
            new_channel: new_group,
        })
        .await;

    let coordinator = Arc::new(EscalationCoordinator::new(
        store.clone(),
        expert_gateway.clone(),
        VET_GROUP,
    ));
    let pipeline = RequestPipeline::new(
        Arc::new(FixedSpecialist(FMD_RESPONSE.to_string())),
        Some(coordinator.clone()),
    );

    let reply = pipeline.handle_farmer_message(&farmer_message()).await;
    assert!(reply.contains("escalated"));

    let case = store
        .list_in_state(CaseState::AwaitingExpert)
        .await
        .expect("list")
        .pop()
        .expect("case ended in awaiting_expert despite the relocation");
    assert!(case.expert_message_ref.is_some());

    // The post landed on the relocated channel, and the new id is cached for
    // subsequent posts.
    let posted = expert_gateway.sent().await;
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].channel, new_group);
    assert_eq!(coordinator.expert_channel().await, new_group);
}
