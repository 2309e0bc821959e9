//! HTTP control API for the player.

use std::sync::{Arc, Mutex};

use actix_web::{HttpResponse, Responder, get, post, web};
use crossbeam_channel::Sender;
use radio_player::signals::{RadioSignal, SignalBus};
use radio_player::stream::device;
use radio_types::PlayerStatus;
use serde::{Deserialize, Serialize};

use crate::runtime::PlayerCommand;

pub struct AppState {
    pub cmd_tx: Sender<PlayerCommand>,
    pub status: Arc<Mutex<PlayerStatus>>,
    pub bus: SignalBus,
    pub device: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<String>,
    pub selected: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct VolumeRequest {
    pub value: f32,
}

#[derive(Serialize, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Serialize, Deserialize)]
pub struct ExpandedRequest {
    pub expanded: bool,
}

#[derive(Serialize, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(status)
        .service(devices)
        .service(play)
        .service(pause)
        .service(toggle)
        .service(set_volume)
        .service(set_muted)
        .service(set_expanded)
        .service(set_visibility)
        .service(video_started)
        .service(online);
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[get("/status")]
pub async fn status(state: web::Data<AppState>) -> impl Responder {
    match state.status.lock() {
        Ok(s) => HttpResponse::Ok().json(&*s),
        Err(_) => HttpResponse::InternalServerError().body("status unavailable"),
    }
}

#[get("/devices")]
pub async fn devices(state: web::Data<AppState>) -> impl Responder {
    let host = cpal::default_host();
    match device::list_device_names(&host) {
        Ok(mut devices) => {
            devices.dedup();
            HttpResponse::Ok().json(DevicesResponse {
                devices,
                selected: state.device.clone(),
            })
        }
        Err(e) => HttpResponse::InternalServerError().body(format!("{e:#}")),
    }
}

#[post("/play")]
pub async fn play(state: web::Data<AppState>) -> impl Responder {
    send(&state, PlayerCommand::Play)
}

#[post("/pause")]
pub async fn pause(state: web::Data<AppState>) -> impl Responder {
    send(&state, PlayerCommand::Pause)
}

#[post("/toggle")]
pub async fn toggle(state: web::Data<AppState>) -> impl Responder {
    send(&state, PlayerCommand::Toggle)
}

#[post("/volume")]
pub async fn set_volume(
    state: web::Data<AppState>,
    body: web::Json<VolumeRequest>,
) -> impl Responder {
    if !body.value.is_finite() {
        return HttpResponse::BadRequest().body("volume must be a number");
    }
    send(&state, PlayerCommand::SetVolume(body.value))
}

#[post("/mute")]
pub async fn set_muted(state: web::Data<AppState>, body: web::Json<MuteRequest>) -> impl Responder {
    send(&state, PlayerCommand::SetMuted(body.muted))
}

#[post("/expanded")]
pub async fn set_expanded(
    state: web::Data<AppState>,
    body: web::Json<ExpandedRequest>,
) -> impl Responder {
    send(&state, PlayerCommand::SetExpanded(body.expanded))
}

#[post("/visibility")]
pub async fn set_visibility(
    state: web::Data<AppState>,
    body: web::Json<VisibilityRequest>,
) -> impl Responder {
    send(&state, PlayerCommand::SetVisible(body.visible))
}

/// Stands in for a video player elsewhere on the page starting playback.
#[post("/signals/video-started")]
pub async fn video_started(state: web::Data<AppState>) -> impl Responder {
    state.bus.publish(RadioSignal::VideoStarted);
    HttpResponse::Ok().finish()
}

#[post("/signals/online")]
pub async fn online(state: web::Data<AppState>) -> impl Responder {
    state.bus.publish(RadioSignal::Online);
    HttpResponse::Ok().finish()
}

fn send(state: &AppState, cmd: PlayerCommand) -> HttpResponse {
    if state.cmd_tx.send(cmd).is_ok() {
        HttpResponse::Ok().finish()
    } else {
        HttpResponse::InternalServerError().body("player offline")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};
    use crossbeam_channel::{Receiver, unbounded};
    use radio_types::ServerRole;

    fn make_state() -> (web::Data<AppState>, Receiver<PlayerCommand>) {
        let (cmd_tx, cmd_rx) = unbounded();
        let snapshot = PlayerStatus {
            playing: true,
            volume: 0.9,
            active_server: ServerRole::Backup,
            primary_url: "http://primary.test/live".to_string(),
            backup_url: "http://backup.test/live".to_string(),
            ..PlayerStatus::default()
        };
        let state = web::Data::new(AppState {
            cmd_tx,
            status: Arc::new(Mutex::new(snapshot)),
            bus: SignalBus::new(),
            device: None,
        });
        (state, cmd_rx)
    }

    #[actix_web::test]
    async fn health_reports_version() {
        let app = test::init_service(App::new().service(health)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp: HealthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
    }

    #[actix_web::test]
    async fn status_returns_snapshot() {
        let (state, _rx) = make_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let req = test::TestRequest::get().uri("/status").to_request();
        let resp: PlayerStatus = test::call_and_read_body_json(&app, req).await;
        assert!(resp.playing);
        assert_eq!(resp.active_server, ServerRole::Backup);
        assert_eq!(resp.backup_url, "http://backup.test/live");
    }

    #[actix_web::test]
    async fn transport_posts_forward_commands() {
        let (state, rx) = make_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        for uri in ["/play", "/pause", "/toggle"] {
            let req = test::TestRequest::post().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_success());
        }
        assert_eq!(rx.try_recv().unwrap(), PlayerCommand::Play);
        assert_eq!(rx.try_recv().unwrap(), PlayerCommand::Pause);
        assert_eq!(rx.try_recv().unwrap(), PlayerCommand::Toggle);
    }

    #[actix_web::test]
    async fn settings_posts_forward_values() {
        let (state, rx) = make_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/volume")
            .set_json(VolumeRequest { value: 0.5 })
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        let req = test::TestRequest::post()
            .uri("/mute")
            .set_json(MuteRequest { muted: true })
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        let req = test::TestRequest::post()
            .uri("/visibility")
            .set_json(VisibilityRequest { visible: false })
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        assert_eq!(rx.try_recv().unwrap(), PlayerCommand::SetVolume(0.5));
        assert_eq!(rx.try_recv().unwrap(), PlayerCommand::SetMuted(true));
        assert_eq!(rx.try_recv().unwrap(), PlayerCommand::SetVisible(false));
    }

    #[actix_web::test]
    async fn signal_posts_publish_on_the_bus() {
        let (state, _rx) = make_state();
        let inbox = state.bus.subscribe();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post().uri("/signals/video-started").to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        let req = test::TestRequest::post().uri("/signals/online").to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        assert_eq!(inbox.try_recv().unwrap(), RadioSignal::VideoStarted);
        assert_eq!(inbox.try_recv().unwrap(), RadioSignal::Online);
    }

    #[actix_web::test]
    async fn stopped_player_is_reported() {
        let (state, rx) = make_state();
        drop(rx);
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let req = test::TestRequest::post().uri("/play").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
