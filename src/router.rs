//! Request router: the simulated IdP and SP state machine.
//!
//! Every request passes through [`SimulatorAgent::route`], which decides
//! from the path and the browser session whether to answer directly
//! (redirect or page) or to let the request through to the application,
//! possibly with SP headers attached.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::attributes::AttributePipeline;
use crate::config::SimulatorConfig;
use crate::directory::{Directory, IdentityRecord};
use crate::error::SimulatorError;
use crate::headers::{inject_attribute_headers, inject_session_headers, HeaderSet};
use crate::pages::{show_error_detail, Page};
use crate::session::SimSession;

/// What the server should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// 302 to the given location.
    Redirect(String),

    /// Forward to the application with SP headers.
    Forward(HeaderSet),

    /// Forward to the application untouched.
    PassThrough,

    /// Answer with a simulator page.
    Render(Page, u16),
}

/// The parts of a request the router looks at.
#[derive(Debug, Clone, Default)]
pub struct SimRequest {
    pub method: String,

    /// Path component only.
    pub path: String,

    /// Query parameters merged with form parameters (form wins).
    pub params: HashMap<String, String>,

    /// Full request URL, used as the post-login destination.
    pub url: String,
}

impl SimRequest {
    fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }
}

/// Simulated IdP + SP in front of one application.
pub struct SimulatorAgent {
    config: SimulatorConfig,
    directory: Arc<Directory>,
    pipeline: AttributePipeline,
}

impl SimulatorAgent {
    pub fn new(
        config: SimulatorConfig,
        directory: Arc<Directory>,
        pipeline: AttributePipeline,
    ) -> Self {
        Self {
            config,
            directory,
            pipeline,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Route a request, mutating the browser session as needed.
    ///
    /// Simulator errors become a fatal page; any other error is returned.
    pub fn route(&self, request: &SimRequest, session: &mut SimSession) -> Result<Action> {
        match self.dispatch(request, session) {
            Ok(action) => Ok(action),
            Err(err) => match err.downcast_ref::<SimulatorError>() {
                Some(sim_err) => {
                    warn!(error = %sim_err, path = %request.path, "Simulator error");
                    let detail = show_error_detail(self.config.debug).then(|| format!("{:#}", err));
                    Ok(Action::Render(
                        Page::FatalError {
                            message: sim_err.to_string(),
                            detail,
                        },
                        500,
                    ))
                }
                None => Err(err),
            },
        }
    }

    fn dispatch(&self, request: &SimRequest, session: &mut SimSession) -> Result<Action> {
        let path = request.path.as_str();
        debug!(method = %request.method, path = %path, "Routing request");

        if path == self.config.idp_login_path {
            return self.idp_login(request, session);
        }

        if path == self.config.idp_logout_path {
            session.reset();
            debug!("(IdP) Reset session, redirecting to IdP login page");
            return Ok(Action::Redirect(self.config.idp_login_path.clone()));
        }

        if path == self.config.wayf_path {
            // Discovery is not simulated
            debug!("(WAYF) Discovery service is not implemented, passing request through");
            return Ok(Action::PassThrough);
        }

        if self.config.should_protect_path(path) {
            return self.sp_gateway(request, session);
        }

        debug!(path = %path, "(SP) URL not behind the SP, passing request through");
        Ok(Action::PassThrough)
    }

    fn idp_login(&self, request: &SimRequest, session: &mut SimSession) -> Result<Action> {
        let destination = request.param("destination").unwrap_or("/").to_string();

        if let Some(user_id) = request.param("user") {
            debug!(user_id = %user_id, "(IdP) New user authentication requested");

            let record = match self.lookup_user(user_id) {
                Ok(record) => record,
                Err(err) => {
                    debug!("(IdP) User authentication failed, requested user not found");
                    let status = err.status();
                    return Ok(Action::Render(
                        Page::Chooser {
                            message: Some(err.to_string()),
                            destination: request.param("destination").map(str::to_string),
                        },
                        status,
                    ));
                }
            };

            session.idp_session().user_id = Some(record.id.clone());
            session.sp_session().begin(Utc::now());
            tidy_session(session);

            debug!(user_id = %record.id, "(IdP) User authentication succeeded");
            return Ok(Action::Redirect(destination));
        }

        if session.has_idp_session() && self.config.sso_enabled {
            debug!("(IdP) User already authenticated, redirecting back to application");
            return Ok(Action::Redirect(destination));
        }

        debug!("(IdP) Not already authenticated, showing chooser page");
        tidy_session(session);

        Ok(Action::Render(
            Page::Chooser {
                message: None,
                destination: request.param("destination").map(str::to_string),
            },
            200,
        ))
    }

    fn sp_gateway(&self, request: &SimRequest, session: &mut SimSession) -> Result<Action> {
        if session.has_consistent_sp_session() {
            debug!("(SP) Already authenticated with IdP and SP, injecting headers");
            let headers = self.inject_sp_headers(session)?;
            return Ok(Action::Forward(headers));
        }

        if session.has_idp_session() {
            debug!("(SP) Authenticated with IdP but not SP, authenticating with SP now");
            let user_id = session.idp().user_id.clone();
            let sp = session.sp_session();
            sp.user_id = user_id;
            if sp.session_id.is_none() {
                sp.begin(Utc::now());
            }
            let headers = self.inject_sp_headers(session)?;
            return Ok(Action::Forward(headers));
        }

        debug!("(SP) No suitable IdP/SP sessions found, redirecting to IdP");

        // May hold mismatched SP and IdP users
        session.reset();

        Ok(Action::Redirect(format!(
            "{}?destination={}",
            self.config.idp_login_path,
            urlencoding::encode(&request.url)
        )))
    }

    /// Build the full SP header set for the session's user.
    fn inject_sp_headers(&self, session: &SimSession) -> Result<HeaderSet> {
        let sp = session.sp();
        let user_id = sp.user_id.as_deref().unwrap_or_default();
        let record = self
            .directory
            .get(user_id)
            .ok_or_else(|| SimulatorError::MissingIdentityRecord(user_id.to_string()))?;

        let prepared = self.pipeline.build_headers(record);

        let mut headers = HeaderSet::new();
        inject_attribute_headers(&mut headers, &prepared);
        inject_session_headers(
            &mut headers,
            sp,
            self.pipeline.sp_entity_id(),
            &self.config.assertion_base,
            &prepared.persistent_id,
        )?;

        Ok(headers)
    }

    fn lookup_user(&self, user_id: &str) -> Result<&Arc<IdentityRecord>, SimulatorError> {
        self.directory
            .get(user_id)
            .ok_or_else(|| SimulatorError::UnknownUser(user_id.to_string()))
    }
}

/// Drop an SP user left over from a previous login.
fn tidy_session(session: &mut SimSession) {
    if !session.has_consistent_sp_session() {
        session.sp_session().user_id = None;
    }
}
