use std::path::{Path, PathBuf};
use std::sync::Arc;

use actix_multipart::{Field, Multipart};
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{get, post, web, App, HttpResponse, HttpServer};
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::AudioRequirements;
use crate::error::{FieldLocation, JobResponse, ServiceError};
use crate::identity::{self, UploadedArtifact};
use crate::models::{DataDir, FileType, Job, JobId};
use crate::processor::{DispatchError, Dispatcher};
use crate::publish::{publish, Publication, MSG_INTERNAL, MSG_OK, MSG_PENDING};
use crate::store::JobStore;
use crate::validate::{validate, Verdict};

pub const FIELD_DATA: &str = "data";
pub const FIELD_ID: &str = "id";

pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Dispatcher,
    pub data_dir: DataDir,
    pub requirements: AudioRequirements,
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("could not remove {}: {}", path.display(), err),
    }
}

impl AppState {
    /// Turns a staged upload into a queued job. Blocking; run it off the reactor.
    ///
    /// Until the job is queued both files belong to the request and are removed
    /// on any error. Once queued they belong to the runner.
    pub fn admit(&self, id: JobId, staged: &Path, input_path: &Path) -> Result<JobId, ServiceError> {
        let taken = self.dispatcher.is_in_flight(&id) || input_path.exists() || self.store.get(&id)?.is_some();
        if taken {
            remove_if_present(staged);
            return Err(ServiceError::Conflict(id));
        }

        let admitted = self.admit_new(id, staged, input_path);
        if admitted.is_err() {
            remove_if_present(staged);
            remove_if_present(input_path);
        }
        admitted
    }

    fn admit_new(&self, id: JobId, staged: &Path, input_path: &Path) -> Result<JobId, ServiceError> {
        std::fs::rename(staged, input_path)?;

        let verdict = Verdict::from(&validate(input_path, &self.requirements));
        info!("[{}] validation: accepted={}, {}", id, verdict.accepted, verdict.reason);
        if !verdict.accepted {
            return Err(ServiceError::Unsupported(verdict.reason));
        }

        let mut job = Job::accepted(id.clone(), input_path.to_path_buf());
        self.store.put(&job)?;

        match self.dispatcher.try_dispatch(job.clone()) {
            Ok(()) => {
                info!("[{}] accepted for processing", id);
                Ok(id)
            }
            Err(DispatchError::Busy(id)) => {
                warn!("[{}] queue is full, turning upload away", id);
                let busy = ServiceError::Busy(id);
                if job.reject(busy.to_string()).is_ok() {
                    self.store.put(&job)?;
                }
                Err(busy)
            }
            Err(DispatchError::AlreadyRunning(id)) => Err(ServiceError::Conflict(id)),
            Err(err @ DispatchError::Closed(_)) => {
                if job.fail(err.to_string()).is_ok() {
                    self.store.put(&job)?;
                }
                Err(ServiceError::Internal(err.to_string()))
            }
        }
    }
}

async fn stage_upload(staging: PathBuf, field: &mut Field) -> Result<PathBuf, ServiceError> {
    let named = web::block(move || tempfile::Builder::new().prefix("upload-").tempfile_in(staging)).await??;
    let (file, path) = named.keep().map_err(|err| err.error)?;
    let mut file = tokio::fs::File::from_std(file);

    let written: Result<(), ServiceError> = async {
        while let Some(item) = field.next().await {
            let chunk = item.map_err(|err| ServiceError::BadRequest(err.to_string()))?;
            tokio::io::copy(&mut chunk.as_ref(), &mut file).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(err) = written {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(err);
    }

    Ok(path)
}

#[post("/")]
async fn submit(data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ServiceError> {
    let mut upload = None;

    while let Some(item) = payload.next().await {
        let mut field = match item {
            Ok(field) => field,
            Err(err) => {
                debug!("multipart body ended early: {}", err);
                break;
            }
        };

        if field.name() != Some(FIELD_DATA) {
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .map(str::to_owned);
        let staged = stage_upload(data.data_dir.staging(), &mut field).await?;

        upload = Some(UploadedArtifact {
            staging_path: Some(staged),
            filename,
        });
        break;
    }

    let Some(upload) = upload else {
        return Err(ServiceError::MissingField {
            field: FIELD_DATA,
            location: FieldLocation::Body,
        });
    };

    let id = identity::allocate(&upload);
    let extension = identity::extension(upload.filename.as_deref());
    let input_path = data.data_dir.build_path(&id, FileType::Input { extension: &extension });
    let staged = upload
        .staging_path
        .ok_or_else(|| ServiceError::Internal("upload was not staged".to_owned()))?;

    let state = data.clone();
    let id = web::block(move || state.admit(id, &staged, &input_path)).await??;

    Ok(HttpResponse::Ok().json(JobResponse::new(Some(&id), MSG_OK)))
}

#[derive(Deserialize, Debug)]
struct ResultParams {
    id: Option<String>,
    num_speakers: Option<String>,
}

fn parse_flag(name: &str, value: Option<&str>) -> Result<bool, ServiceError> {
    match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(false),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(other) => Err(ServiceError::BadRequest(format!("'{name}' must be a boolean, got '{other}'"))),
    }
}

async fn attachment(id: &JobId, path: &Path) -> Result<HttpResponse, ServiceError> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|err| ServiceError::Internal(format!("[{id}] result {} unreadable: {err}", path.display())))?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(format!("{id}.csv"))],
        })
        .body(body))
}

#[get("/result")]
async fn result(data: web::Data<AppState>, query: web::Query<ResultParams>) -> Result<HttpResponse, ServiceError> {
    let params = query.into_inner();

    let raw_id = params.id.filter(|id| !id.is_empty()).ok_or(ServiceError::MissingField {
        field: FIELD_ID,
        location: FieldLocation::Parameters,
    })?;
    let want_count = parse_flag("num_speakers", params.num_speakers.as_deref())?;

    let id = JobId::new(raw_id.as_str());
    if identity::sanitize(&raw_id) != raw_id {
        return Err(ServiceError::NotFound(id));
    }

    let store = data.store.clone();
    let lookup = id.clone();
    let job = web::block(move || store.get(&lookup)).await??;

    match publish(job.as_ref(), want_count) {
        Publication::NotFound => Err(ServiceError::NotFound(id)),
        Publication::Pending(_) => Ok(HttpResponse::Accepted().json(JobResponse::new(Some(&id), MSG_PENDING))),
        Publication::SpeakerCount(count) => {
            let mut response = JobResponse::new(Some(&id), count.to_string());
            response.num_speakers = Some(count);
            Ok(HttpResponse::Ok().json(response))
        }
        Publication::Artifact(path) => attachment(&id, &path).await,
        Publication::Failed(detail) => {
            let mut response = JobResponse::new(Some(&id), MSG_INTERNAL);
            response.detail = detail;
            Ok(HttpResponse::InternalServerError().json(response))
        }
        Publication::Rejected(reason) => Ok(HttpResponse::UnsupportedMediaType().json(JobResponse::new(Some(&id), reason))),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(submit).service(result);
}

pub async fn start_web_server(state: AppState, bind: (String, u16)) -> std::io::Result<()> {
    let app_state = web::Data::new(state);

    info!("Starting web server at {}:{}...", bind.0, bind.1);

    HttpServer::new(move || App::new().app_data(app_state.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await
}
