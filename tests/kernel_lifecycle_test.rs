//! Kernel lifecycle: heartbeat, interrupt, shutdown, cancellation and
//! signature checks

mod common;

use common::{assert_bracketed, test_config, types, within, TestKernel, TIMEOUT};
use kernel_protocol::content::*;
use kernel_protocol::{ChannelType, MessageContent};
use kernel_protocol::Message;
use kernel_server::{KernelClient, KernelExit, ServerError, ABORT_MESSAGE};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_heartbeat_echoes_payload() {
    let kernel = TestKernel::start().await;
    let client = kernel.client().await;

    for payload in [&b"ping"[..], &b"\x00\x01binary"[..]] {
        let echo = within(client.ping(payload)).await;
        assert_eq!(echo.len(), 1);
        assert_eq!(&echo[0][..], payload);
    }

    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interrupt_aborts_running_execution() {
    let kernel = TestKernel::start().await;
    let client = kernel.client().await;

    let sent = within(client.send(
        ChannelType::Shell,
        MessageContent::ExecuteRequest(ExecuteRequest::new("sleep")),
    ))
    .await;

    // Control is served while shell is busy
    let interrupt = within(client.request(
        ChannelType::Control,
        MessageContent::InterruptRequest(InterruptRequest {}),
    ))
    .await;
    assert_eq!(interrupt.header.msg_type, "interrupt_reply");

    let reply = within(client.receive(ChannelType::Shell)).await;
    match &reply.content {
        MessageContent::ExecuteReply(reply) => {
            assert_eq!(reply, &ExecuteReply::Abort { execution_count: 1 })
        }
        other => panic!("unexpected content {:?}", other),
    }
    assert_eq!(reply.metadata["status"], "abort");

    let iopub = within(client.iopub_until_idle(&sent.header)).await;
    assert_bracketed(&iopub);
    assert_eq!(types(&iopub), ["status", "execute_input", "stream", "status"]);
    match &iopub[2].content {
        MessageContent::Stream(stream) => {
            assert_eq!(stream.name, StreamName::Stderr);
            assert_eq!(stream.text, ABORT_MESSAGE);
        }
        other => panic!("unexpected content {:?}", other),
    }

    // The next execution runs normally
    within(client.send(
        ChannelType::Shell,
        MessageContent::ExecuteRequest(ExecuteRequest::new("next")),
    ))
    .await;
    let reply = within(client.receive(ChannelType::Shell)).await;
    match &reply.content {
        MessageContent::ExecuteReply(reply) => assert_eq!(reply.status(), ReplyStatus::Ok),
        other => panic!("unexpected content {:?}", other),
    }

    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reply_is_sent_while_shell_backlog_fills_inbound_queue() {
    let mut config = test_config();
    config.runtime.channel_capacity = 2;
    let kernel = TestKernel::start_with(config).await;
    let client = kernel.client().await;

    within(client.send(
        ChannelType::Shell,
        MessageContent::ExecuteRequest(ExecuteRequest::new("sleep")),
    ))
    .await;
    for _ in 0..5 {
        within(client.send(
            ChannelType::Shell,
            MessageContent::KernelInfoRequest(KernelInfoRequest {}),
        ))
        .await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    within(client.request(
        ChannelType::Control,
        MessageContent::InterruptRequest(InterruptRequest {}),
    ))
    .await;

    let reply = within(client.receive(ChannelType::Shell)).await;
    match &reply.content {
        MessageContent::ExecuteReply(reply) => {
            assert_eq!(reply, &ExecuteReply::Abort { execution_count: 1 })
        }
        other => panic!("unexpected content {:?}", other),
    }
    for _ in 0..5 {
        let reply = within(client.receive(ChannelType::Shell)).await;
        assert_eq!(reply.header.msg_type, "kernel_info_reply");
    }

    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_embedded_shutdown_returns_to_host() {
    let kernel = TestKernel::start().await;
    let client = kernel.client().await;
    let engine = kernel.engine.clone();

    let sent = within(client.send(
        ChannelType::Control,
        MessageContent::ShutdownRequest(ShutdownRequest { restart: false }),
    ))
    .await;
    let reply = within(client.receive(ChannelType::Control)).await;
    match &reply.content {
        MessageContent::ShutdownReply(reply) => {
            assert_eq!(reply.status, ReplyStatus::Ok);
            assert!(!reply.restart);
        }
        other => panic!("unexpected content {:?}", other),
    }

    let iopub = within(client.iopub_until_idle(&sent.header)).await;
    assert_eq!(types(&iopub), ["status", "status"]);

    assert_eq!(kernel.wait().await, KernelExit::Shutdown { restart: false });
    assert_eq!(engine.teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_with_restart_is_reported() {
    let kernel = TestKernel::start().await;
    let client = kernel.client().await;

    within(client.request(
        ChannelType::Control,
        MessageContent::ShutdownRequest(ShutdownRequest { restart: true }),
    ))
    .await;

    assert_eq!(kernel.wait().await, KernelExit::Shutdown { restart: true });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_stops_idle_kernel() {
    let kernel = TestKernel::start().await;
    let engine = kernel.engine.clone();

    let started = Instant::now();
    assert_eq!(kernel.stop().await, KernelExit::Cancelled);
    assert!(started.elapsed() < TIMEOUT, "took {:?}", started.elapsed());
    assert_eq!(engine.teardowns.load(Ordering::SeqCst), 0);
}

/// Wait until the execution of `sent` has been announced on IOPub
async fn wait_for_execute_input(client: &KernelClient, sent: &Message) {
    loop {
        let message = within(client.next_iopub()).await;
        let parented = message.parent_header.as_ref().map(|parent| &parent.msg_id);
        if message.header.msg_type == "execute_input" && parented == Some(&sent.header.msg_id) {
            return;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_interrupts_running_execution() {
    let kernel = TestKernel::start().await;
    let client = kernel.client().await;

    let sent = within(client.send(
        ChannelType::Shell,
        MessageContent::ExecuteRequest(ExecuteRequest::new("sleep")),
    ))
    .await;
    wait_for_execute_input(&client, &sent).await;

    let started = Instant::now();
    assert_eq!(kernel.stop().await, KernelExit::Cancelled);
    // Well under the 60s the execution would otherwise take
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stuck_execution_is_aborted_after_close_timeout() {
    let mut config = test_config();
    config.runtime.close_timeout = Duration::from_secs(1);
    let kernel = TestKernel::start_with(config).await;
    let client = kernel.client().await;

    let sent = within(client.send(
        ChannelType::Shell,
        MessageContent::ExecuteRequest(ExecuteRequest::new("hang")),
    ))
    .await;
    wait_for_execute_input(&client, &sent).await;

    let started = Instant::now();
    kernel.cancel.cancel();
    let result = tokio::time::timeout(TIMEOUT, kernel.running.wait())
        .await
        .expect("wait outlived the close timeout");
    assert!(matches!(result, Err(ServerError::Runtime(_))), "{:?}", result);
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_kernel_shutdown_handle() {
    let kernel = TestKernel::start().await;
    assert_eq!(kernel.running.ports().len(), 5);

    kernel.running.shutdown();
    assert!(kernel.running.token().is_cancelled());
    assert_eq!(kernel.wait().await, KernelExit::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrongly_signed_requests_are_dropped() {
    let kernel = TestKernel::start().await;

    let mut wrong = kernel.config.connection.clone();
    wrong.key = "not-the-key".to_string();
    let intruder =
        within(KernelClient::connect(&wrong, &kernel.config.runtime, &kernel.cancel)).await;

    within(intruder.send(
        ChannelType::Shell,
        MessageContent::KernelInfoRequest(KernelInfoRequest {}),
    ))
    .await;
    let unanswered =
        tokio::time::timeout(Duration::from_millis(500), intruder.receive(ChannelType::Shell))
            .await;
    assert!(unanswered.is_err(), "forged request was answered: {:?}", unanswered);

    // The loop is still serving correctly signed clients
    let client = kernel.client().await;
    let reply = within(client.request(
        ChannelType::Shell,
        MessageContent::KernelInfoRequest(KernelInfoRequest {}),
    ))
    .await;
    assert_eq!(reply.header.msg_type, "kernel_info_reply");

    within(intruder.close()).await;
    kernel.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_rejects_invalid_config() {
    let mut config = test_config();
    config.connection.signature_scheme = "hmac-md5".to_string();

    let engine = std::sync::Arc::new(common::ScriptedEngine::default());
    let renderer = std::sync::Arc::new(kernel_execution::PlainTextRenderer);
    let result = kernel_server::Kernel::new(config, engine, renderer)
        .start(&tokio_util::sync::CancellationToken::new())
        .await;
    assert!(result.is_err());
}
