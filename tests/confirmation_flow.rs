mod common;

use std::time::Duration;

use common::StubBackend;
use ponto_kiosk::confirm::{ConfirmFlow, PromptState};
use ponto_kiosk::display::{self, MemorySurface};
use ponto_kiosk::{BackendClient, EpochCounter, TickOutcome};

const DETECTION: &str = r#"{
    "found": true,
    "cpf": "12345678901",
    "nome": "Maria Souza",
    "matricula": "M-042",
    "horario": "2026-08-22 09:15:00",
    "confidence": 38.2,
    "detection_id": "det-7"
}"#;

const OTHER_DETECTION: &str = r#"{
    "found": true,
    "cpf": "98765432100",
    "nome": "Ana Lima",
    "matricula": "M-007",
    "horario": "2026-08-22 09:16:10",
    "confidence": 35.0,
    "detection_id": "det-8"
}"#;

fn flow_against(stub: &StubBackend, autoclose: Duration) -> (ConfirmFlow, MemorySurface) {
    let surface = MemorySurface::default();
    let client =
        BackendClient::new(&stub.base_url(), Some(Duration::from_secs(2))).expect("client");
    let flow = ConfirmFlow::new(
        client,
        display::shared(surface.clone()),
        EpochCounter::default(),
        autoclose,
    );
    (flow, surface)
}

fn open_prompt(stub: &StubBackend, flow: &mut ConfirmFlow) {
    stub.route("GET", "/api/last_detection", 200, DETECTION);
    assert_eq!(flow.poll_tick(), TickOutcome::Applied);
    assert!(matches!(flow.state(), PromptState::Open { .. }));
}

#[test]
fn pending_detection_opens_the_prompt() {
    let stub = StubBackend::start();
    stub.route("GET", "/api/last_detection", 200, DETECTION);
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));

    assert_eq!(flow.poll_tick(), TickOutcome::Applied);

    let prompt = surface.prompt().expect("prompt rendered");
    assert_eq!(prompt.record.nome, "Maria Souza");
    assert_eq!(prompt.record.matricula, "M-042");
    assert!(prompt.controls_enabled);
    assert!(prompt.status.is_none());
}

#[test]
fn nothing_pending_leaves_the_prompt_alone() {
    let stub = StubBackend::start();
    stub.route_sequence(
        "GET",
        "/api/last_detection",
        &[(200, DETECTION), (200, r#"{"found": false}"#)],
    );
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));

    assert_eq!(flow.poll_tick(), TickOutcome::Applied);
    assert_eq!(flow.poll_tick(), TickOutcome::Applied);

    let prompt = surface.prompt().expect("prompt still up");
    assert_eq!(prompt.record.nome, "Maria Souza");
}

#[test]
fn newer_detection_supersedes_the_open_prompt() {
    let stub = StubBackend::start();
    stub.route_sequence(
        "GET",
        "/api/last_detection",
        &[(200, DETECTION), (200, OTHER_DETECTION)],
    );
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));

    flow.poll_tick();
    flow.poll_tick();

    let prompt = surface.prompt().expect("prompt");
    assert_eq!(prompt.record.nome, "Ana Lima");
    assert_eq!(prompt.record.detection_id, "det-8");
    assert!(prompt.controls_enabled);
}

#[test]
fn detection_without_an_id_is_rejected() {
    let stub = StubBackend::start();
    stub.route(
        "GET",
        "/api/last_detection",
        200,
        r#"{"found": true, "cpf": "12345678901", "nome": "Maria Souza",
            "matricula": "M-042", "horario": "09:15"}"#,
    );
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));

    assert_eq!(flow.poll_tick(), TickOutcome::SkippedSubmit);
    assert_eq!(flow.state(), &PromptState::Closed);
    assert!(surface.prompt().is_none());
}

#[test]
fn confirmed_prompt_reports_and_closes_after_the_hold() {
    let stub = StubBackend::start();
    stub.route_sequence(
        "GET",
        "/api/last_detection",
        &[(200, DETECTION), (200, r#"{"found": false}"#)],
    );
    stub.route(
        "POST",
        "/api/confirmar_ponto",
        200,
        r#"{"success": true, "message": "Ponto registrado com sucesso."}"#,
    );
    let (mut flow, surface) = flow_against(&stub, Duration::ZERO);

    flow.poll_tick();
    flow.confirm();

    // The on-screen message is the kiosk's own, not the backend's.
    let prompt = surface.prompt().expect("prompt");
    assert_eq!(
        prompt.status.as_deref(),
        Some("Ponto registrado com sucesso!")
    );
    assert!(!prompt.controls_enabled);

    let sent = stub.requests_for("/api/confirmar_ponto");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("\"cpf\":\"12345678901\""));
    assert!(sent[0].body.contains("\"detection_id\":\"det-7\""));
    assert!(sent[0].body.contains("\"confidence\":38.2"));

    // Zero hold: the next poll closes it before fetching.
    assert_eq!(flow.poll_tick(), TickOutcome::Applied);
    assert_eq!(flow.state(), &PromptState::Closed);
    assert!(surface.prompt().is_none());
}

#[test]
fn failed_status_reopens_with_the_reply_detail() {
    let stub = StubBackend::start();
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));
    open_prompt(&stub, &mut flow);
    stub.route("POST", "/api/confirmar_ponto", 500, "explodiu");

    flow.confirm();

    let prompt = surface.prompt().expect("prompt");
    assert_eq!(prompt.status.as_deref(), Some("Falha (500). explodiu"));
    assert!(prompt.controls_enabled);
}

#[test]
fn empty_error_body_gets_the_fallback_detail() {
    let stub = StubBackend::start();
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));
    open_prompt(&stub, &mut flow);
    stub.route("POST", "/api/confirmar_ponto", 500, "");

    flow.confirm();

    let prompt = surface.prompt().expect("prompt");
    assert_eq!(
        prompt.status.as_deref(),
        Some("Falha (500). Resposta inválida do servidor.")
    );
}

#[test]
fn unparseable_success_reply_reopens() {
    let stub = StubBackend::start();
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));
    open_prompt(&stub, &mut flow);
    stub.route("POST", "/api/confirmar_ponto", 200, "oops");

    flow.confirm();

    let prompt = surface.prompt().expect("prompt");
    assert_eq!(prompt.status.as_deref(), Some("Resposta inválida (JSON)."));
    assert!(prompt.controls_enabled);
}

#[test]
fn declined_confirmation_shows_the_backend_message() {
    let stub = StubBackend::start();
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));
    open_prompt(&stub, &mut flow);
    stub.route(
        "POST",
        "/api/confirmar_ponto",
        200,
        r#"{"success": false, "message": "Fora do horário."}"#,
    );

    flow.confirm();

    let prompt = surface.prompt().expect("prompt");
    assert_eq!(prompt.status.as_deref(), Some("Fora do horário."));
    assert!(prompt.controls_enabled);
}

#[test]
fn declined_without_a_message_gets_the_fallback() {
    let stub = StubBackend::start();
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));
    open_prompt(&stub, &mut flow);
    stub.route("POST", "/api/confirmar_ponto", 200, r#"{"success": false}"#);

    flow.confirm();

    let prompt = surface.prompt().expect("prompt");
    assert_eq!(prompt.status.as_deref(), Some("Falha ao registrar ponto."));
}

#[test]
fn transport_failure_reopens_with_the_connection_status() {
    let stub = StubBackend::start();
    let (mut flow, surface) = flow_against(&stub, Duration::from_millis(1000));
    open_prompt(&stub, &mut flow);
    stub.stop();

    flow.confirm();

    let prompt = surface.prompt().expect("prompt");
    assert_eq!(
        prompt.status.as_deref(),
        Some("Problema de conexão ao enviar dados.")
    );
    assert!(prompt.controls_enabled);
}
