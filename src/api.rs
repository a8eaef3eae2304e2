use crate::{
    config::AppConfig,
    config_tree::EditTransaction,
    outcome::{ErrorKind, Outcome},
    services::{
        auth::{
            AuthService, FlashMessage, LOGIN_FAILED_MESSAGE, LoginOutcome, MessageLevel,
            PasswordService, SESSION_EXPIRED_MESSAGE, SessionState, session::SESSION_STATE_KEY,
            unix_now,
        },
        language::LanguageService,
        navigation::{Route, is_safe_redirect, login_retry, resolve_landing},
        wizard::{StepAccess, WizardProgress, WizardService, WizardStep},
    },
    uci_client::{ConfigStore, Filter},
};
use actix_session::Session;
use actix_web::{HttpRequest, HttpResponse, web};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;

pub const CSRF_HEADER: &str = "X-CSRF-Token";
const LUCI_PATH: &str = "/cgi-bin/luci";

/// Session record to persist together with what to answer.
type Handled<T> = (SessionState, Outcome<T>);

#[derive(Deserialize)]
pub struct NextQuery {
    next: Option<String>,
}

#[derive(Deserialize)]
pub struct BacklinkQuery {
    backlink: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct LoginForm {
    password: Option<String>,
    csrf_token: Option<String>,
    next: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct StepForm {
    csrf_token: Option<String>,
    password: Option<String>,
    password_validation: Option<String>,
}

#[derive(Debug, Validate)]
pub struct PasswordStepInput {
    #[validate(min_length = 6)]
    password: String,
    password_validation: String,
}

impl PasswordStepInput {
    fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Err(e) = self.validate() {
            errors.push(e.to_string());
        }
        if self.password != self.password_validation {
            errors.push("passwords do not match".to_string());
        }
        errors
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSurface {
    csrf_token: String,
    next: Option<String>,
    luci_path: &'static str,
    lang: String,
    messages: Vec<FlashMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    number: u32,
    title: &'static str,
    completed: bool,
    available: bool,
}

impl StepSummary {
    fn new(step: WizardStep, progress: WizardProgress) -> Self {
        Self {
            number: step.number(),
            title: step.title(),
            completed: progress.allowed_max() > step.number(),
            available: progress.guard(step.number()) == StepAccess::Allow,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardOverview {
    csrf_token: String,
    allowed_step_max: u32,
    steps: Vec<StepSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPage {
    csrf_token: String,
    step: StepSummary,
    fields: &'static [&'static str],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPanel {
    csrf_token: String,
    page: String,
    wizard_completed: bool,
}

#[derive(Clone)]
pub struct Api<Store>
where
    Store: ConfigStore,
{
    pub store: Store,
    pub config: AppConfig,
}

impl<Store> Api<Store>
where
    Store: ConfigStore + 'static,
{
    pub fn new(store: Store, config: AppConfig) -> Self {
        Api { store, config }
    }

    pub async fn index(
        api: web::Data<Self>,
        session: Session,
        req: HttpRequest,
        query: web::Query<NextQuery>,
    ) -> HttpResponse {
        debug!("index() called");

        let (loaded_id, state) = Self::load_session(&session, &api.config);
        let handled = api
            .show_index(state, query.next.as_deref(), &request_host(&req))
            .await;
        Self::finish(&session, loaded_id, handled, req.path())
    }

    pub async fn login(
        api: web::Data<Self>,
        session: Session,
        req: HttpRequest,
        form: web::Form<LoginForm>,
    ) -> HttpResponse {
        debug!("login() called");

        let (loaded_id, state) = Self::load_session(&session, &api.config);
        let form = form.into_inner();
        let presented = form.csrf_token.as_deref().or_else(|| csrf_header(&req));
        let handled = api
            .authenticate(
                state,
                presented,
                form.password.as_deref().unwrap_or_default(),
                form.next.as_deref(),
                &request_host(&req),
            )
            .await;
        Self::finish(&session, loaded_id, handled, req.path())
    }

    pub async fn logout(session: Session) -> HttpResponse {
        debug!("logout() called");

        session.purge();
        Outcome::<()>::RedirectTo(Route::Index.path()).into_response("/")
    }

    pub async fn change_lang(
        api: web::Data<Self>,
        req: HttpRequest,
        lang: web::Path<String>,
        query: web::Query<BacklinkQuery>,
    ) -> HttpResponse {
        debug!("change_lang() called");

        api.switch_language(&lang, query.backlink.as_deref(), &request_host(&req))
            .await
            .into_response(req.path())
    }

    pub async fn wizard_index(
        api: web::Data<Self>,
        session: Session,
        req: HttpRequest,
    ) -> HttpResponse {
        debug!("wizard_index() called");

        let (loaded_id, state) = Self::load_session(&session, &api.config);
        let handled = api.show_wizard(state, req.path()).await;
        Self::finish(&session, loaded_id, handled, req.path())
    }

    pub async fn wizard_step(
        api: web::Data<Self>,
        session: Session,
        req: HttpRequest,
        step: web::Path<u32>,
    ) -> HttpResponse {
        debug!("wizard_step() called");

        let (loaded_id, state) = Self::load_session(&session, &api.config);
        let handled = api.show_step(state, step.into_inner(), req.path()).await;
        Self::finish(&session, loaded_id, handled, req.path())
    }

    pub async fn submit_step(
        api: web::Data<Self>,
        session: Session,
        req: HttpRequest,
        step: web::Path<u32>,
        form: web::Form<StepForm>,
    ) -> HttpResponse {
        debug!("submit_step() called");

        let (loaded_id, state) = Self::load_session(&session, &api.config);
        let form = form.into_inner();
        let presented = form.csrf_token.as_deref().or_else(|| csrf_header(&req));
        let handled = api
            .complete_step(
                state,
                step.into_inner(),
                presented,
                &form,
                &request_host(&req),
            )
            .await;
        Self::finish(&session, loaded_id, handled, req.path())
    }

    pub async fn config_panel(
        api: web::Data<Self>,
        session: Session,
        req: HttpRequest,
    ) -> HttpResponse {
        debug!("config_panel() called");

        let page = req.match_info().get("page").unwrap_or("overview").to_string();
        let (loaded_id, state) = Self::load_session(&session, &api.config);
        let handled = api.show_config(state, page, req.path()).await;
        Self::finish(&session, loaded_id, handled, req.path())
    }

    async fn show_index(
        &self,
        state: SessionState,
        next: Option<&str>,
        host: &str,
    ) -> Handled<LoginSurface> {
        let result = match self.store.query(Filter::foris()).await {
            Ok(result) => result,
            Err(e) => {
                error!("index failed: {e:#}");
                return (state, Outcome::Error(e.into()));
            }
        };

        let progress = WizardService::progress_from(&result);
        let credential_set = PasswordService::stored_hash(&result).is_some();
        let state = AuthService::resolve_session(state, progress, credential_set, &self.config);
        if AuthService::is_authenticated(&state, &self.config) {
            return (
                state,
                Outcome::RedirectTo(resolve_landing(true, progress, next, host)),
            );
        }

        let (state, messages) = state.take_messages();
        let surface = LoginSurface {
            csrf_token: state.csrf_token().to_string(),
            next: next
                .filter(|next| is_safe_redirect(next, host))
                .map(str::to_string),
            luci_path: LUCI_PATH,
            lang: LanguageService::language_from(&result, &self.config.language),
            messages,
        };

        (state, Outcome::Continue(surface))
    }

    async fn authenticate(
        &self,
        state: SessionState,
        presented: Option<&str>,
        password: &str,
        next: Option<&str>,
        host: &str,
    ) -> Handled<()> {
        if let Err(e) = state.verify_csrf(presented) {
            warn!("login refused: {e}");
            return (state, Outcome::Error(e.into()));
        }

        match AuthService::login(&self.store, &state, password, unix_now()).await {
            Ok(LoginOutcome::Authenticated(state)) => {
                let target = next
                    .filter(|next| is_safe_redirect(next, host))
                    .map(str::to_string)
                    .unwrap_or_else(|| Route::Index.path());
                (state, Outcome::RedirectTo(target))
            }
            Ok(LoginOutcome::Rejected) => (
                state.with_message(MessageLevel::Error, LOGIN_FAILED_MESSAGE),
                Outcome::Error(ErrorKind::AuthenticationFailed {
                    retry: login_retry(next, host),
                }),
            ),
            Err(e) => {
                error!("login failed: {e:#}");
                (state, Outcome::Error(e.into()))
            }
        }
    }

    async fn switch_language(&self, lang: &str, backlink: Option<&str>, host: &str) -> Outcome<()> {
        if !self.config.language.is_available(lang) {
            return Outcome::Error(ErrorKind::NotFound(format!(
                "Language '{lang}' is not available."
            )));
        }

        if let Err(e) = LanguageService::write_language(&self.store, lang).await {
            error!("change_lang failed: {e:#}");
        }

        Outcome::RedirectTo(
            backlink
                .filter(|backlink| is_safe_redirect(backlink, host))
                .map(str::to_string)
                .unwrap_or_else(|| Route::Index.path()),
        )
    }

    async fn show_wizard(&self, state: SessionState, path: &str) -> Handled<WizardOverview> {
        let (state, progress) = match self.authorize(state, path).await {
            Ok(authorized) => authorized,
            Err(handled) => return handled,
        };

        if progress.is_completed() {
            return (state, Outcome::RedirectTo(Route::ConfigIndex.path()));
        }

        let overview = WizardOverview {
            csrf_token: state.csrf_token().to_string(),
            allowed_step_max: progress.allowed_max(),
            steps: WizardStep::ALL
                .into_iter()
                .map(|step| StepSummary::new(step, progress))
                .collect(),
        };

        (state, Outcome::Continue(overview))
    }

    async fn show_step(&self, state: SessionState, step: u32, path: &str) -> Handled<StepPage> {
        let (state, progress) = match self.authorize(state, path).await {
            Ok(authorized) => authorized,
            Err(handled) => return handled,
        };

        if let StepAccess::Redirect(allowed) = progress.guard(step) {
            debug!("step {step} not yet available");
            return (
                state,
                Outcome::Error(ErrorKind::StepOutOfOrder { allowed }),
            );
        }

        let Some(wizard_step) = WizardStep::from_number(step) else {
            return (state, Outcome::Error(ErrorKind::NotFound(path.to_string())));
        };

        let page = StepPage {
            csrf_token: state.csrf_token().to_string(),
            step: StepSummary::new(wizard_step, progress),
            fields: step_fields(wizard_step),
        };

        (state, Outcome::Continue(page))
    }

    async fn complete_step(
        &self,
        state: SessionState,
        step: u32,
        presented: Option<&str>,
        form: &StepForm,
        host: &str,
    ) -> Handled<()> {
        if let Err(e) = state.verify_csrf(presented) {
            warn!("step submission refused: {e}");
            return (state, Outcome::Error(e.into()));
        }

        let (state, progress) = match self.resolve(state).await {
            Ok(resolved) => resolved,
            Err(handled) => return handled,
        };
        if !AuthService::is_authenticated(&state, &self.config) {
            return (state, Outcome::Error(ErrorKind::Forbidden));
        }

        if let StepAccess::Redirect(allowed) = progress.guard(step) {
            return (
                state,
                Outcome::Error(ErrorKind::StepOutOfOrder { allowed }),
            );
        }

        let edit = match step_edit(step, form) {
            Ok(edit) => edit,
            Err(kind) => return (state, Outcome::Error(kind)),
        };

        match WizardService::complete_step(&self.store, step, edit).await {
            Ok(completion) => {
                let progress = completion.progress();
                let state = state.with_next_step_allowed(progress.furthest_step());
                (
                    state,
                    Outcome::RedirectTo(resolve_landing(true, progress, None, host)),
                )
            }
            Err(e) => {
                error!("submit_step failed: {e:#}");
                (state, Outcome::Error(e.into()))
            }
        }
    }

    async fn show_config(&self, state: SessionState, page: String, path: &str) -> Handled<ConfigPanel> {
        let (state, progress) = match self.authorize(state, path).await {
            Ok(authorized) => authorized,
            Err(handled) => return handled,
        };

        let panel = ConfigPanel {
            csrf_token: state.csrf_token().to_string(),
            page,
            wizard_completed: progress.is_completed(),
        };

        (state, Outcome::Continue(panel))
    }

    /// Read the wizard progress and bring the session up to date with it.
    async fn resolve<T>(
        &self,
        state: SessionState,
    ) -> Result<(SessionState, WizardProgress), Handled<T>> {
        match self.store.query(Filter::foris()).await {
            Ok(result) => {
                let progress = WizardService::progress_from(&result);
                let credential_set = PasswordService::stored_hash(&result).is_some();
                Ok((
                    AuthService::resolve_session(state, progress, credential_set, &self.config),
                    progress,
                ))
            }
            Err(e) => {
                error!("reading wizard progress failed: {e:#}");
                Err((state, Outcome::Error(e.into())))
            }
        }
    }

    /// Gate for protected pages; anonymous sessions are sent to log in.
    async fn authorize<T>(
        &self,
        state: SessionState,
        path: &str,
    ) -> Result<(SessionState, WizardProgress), Handled<T>> {
        let (state, progress) = self.resolve(state).await?;

        if !AuthService::is_authenticated(&state, &self.config) {
            debug!("unauthenticated request for {path}");
            return Err((state, Outcome::Error(ErrorKind::Unauthenticated)));
        }

        Ok((state, progress))
    }

    fn load_session(session: &Session, config: &AppConfig) -> (Option<String>, SessionState) {
        let now = unix_now();
        let stored = session
            .get::<SessionState>(SESSION_STATE_KEY)
            .unwrap_or_else(|e| {
                warn!("failed to read session: {e}");
                None
            });
        let loaded_id = stored.as_ref().map(|state| state.id().to_string());

        let state = match stored {
            Some(state) if !state.is_expired(now, config.session.idle_timeout) => {
                state.touched(now)
            }
            Some(_) => {
                debug!("session expired");
                SessionState::new(now).with_message(MessageLevel::Info, SESSION_EXPIRED_MESSAGE)
            }
            None => SessionState::new(now),
        };

        (loaded_id, state)
    }

    fn finish<T>(
        session: &Session,
        loaded_id: Option<String>,
        (state, outcome): Handled<T>,
        path: &str,
    ) -> HttpResponse
    where
        T: Serialize,
    {
        if loaded_id.is_some_and(|id| id != state.id()) {
            session.renew();
        }

        if let Err(e) = session.insert(SESSION_STATE_KEY, &state) {
            error!("failed to store session: {e}");
            return HttpResponse::InternalServerError().finish();
        }

        outcome.into_response(path)
    }
}

/// Route table of the web interface.
pub fn configure<Store>(cfg: &mut web::ServiceConfig)
where
    Store: ConfigStore + 'static,
{
    cfg.route("/", web::get().to(Api::<Store>::index))
        .route("/", web::post().to(Api::<Store>::login))
        .route("/logout", web::get().to(Api::<Store>::logout))
        .route("/lang/{lang}", web::get().to(Api::<Store>::change_lang))
        .route("/wizard/", web::get().to(Api::<Store>::wizard_index))
        .route("/wizard/step/{step}", web::get().to(Api::<Store>::wizard_step))
        .route("/wizard/step/{step}", web::post().to(Api::<Store>::submit_step))
        .route("/config/", web::get().to(Api::<Store>::config_panel))
        .route("/config/{page}/", web::get().to(Api::<Store>::config_panel));
}

fn request_host(req: &HttpRequest) -> String {
    req.connection_info().host().to_string()
}

fn csrf_header(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
}

fn step_fields(step: WizardStep) -> &'static [&'static str] {
    match step {
        WizardStep::Password => &["password", "password_validation"],
        _ => &[],
    }
}

/// Settings written together with completing `step`.
fn step_edit(step: u32, form: &StepForm) -> Result<EditTransaction, ErrorKind> {
    match WizardStep::from_number(step) {
        Some(WizardStep::Password) => {
            let input = PasswordStepInput {
                password: form.password.clone().unwrap_or_default(),
                password_validation: form.password_validation.clone().unwrap_or_default(),
            };

            let errors = input.errors();
            if !errors.is_empty() {
                return Err(ErrorKind::InvalidInput(errors));
            }

            let hash = PasswordService::hash_password(&input.password).map_err(|e| {
                error!("failed to hash password: {e:#}");
                ErrorKind::Internal
            })?;
            Ok(PasswordService::credential_edit(&hash))
        }
        Some(_) => Ok(EditTransaction::new()),
        None => Err(ErrorKind::NotFound(format!("no wizard step {step}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        middleware::{SecurityHeadersMw, session_middleware},
        outcome::{STEP_NOT_CONFIRMED, STORE_UNAVAILABLE},
        services::auth::CredentialCheck,
        session_store::MemorySessionStore,
        uci_client::{MemoryStore, StoreError},
    };
    use actix_web::{
        App,
        cookie::{Cookie, Key},
        dev::ServiceResponse,
        http::{StatusCode, header},
        test,
    };
    use serde_json::Value;

    const PASSWORD: &str = "turris1";

    macro_rules! app {
        ($store:expr) => {
            app!($store, MemorySessionStore::new())
        };
        ($store:expr, $sessions:expr) => {
            test::init_service(
                App::new()
                    .wrap(SecurityHeadersMw)
                    .wrap(session_middleware(
                        &AppConfig::default().session,
                        Key::generate(),
                        $sessions,
                    ))
                    .app_data(web::Data::new(Api::new($store, AppConfig::default())))
                    .configure(configure::<MemoryStore>),
            )
            .await
        };
    }

    macro_rules! get {
        ($app:expr, $uri:expr, $cookie:expr) => {{
            let mut req = test::TestRequest::get().uri($uri);
            if let Some(cookie) = $cookie.clone() {
                req = req.cookie(cookie);
            }
            test::call_service(&$app, req.to_request()).await
        }};
    }

    macro_rules! post {
        ($app:expr, $uri:expr, $cookie:expr, $form:expr) => {{
            let mut req = test::TestRequest::post().uri($uri).set_form($form);
            if let Some(cookie) = $cookie.clone() {
                req = req.cookie(cookie);
            }
            test::call_service(&$app, req.to_request()).await
        }};
    }

    fn session_cookie<B>(resp: &ServiceResponse<B>) -> Option<Cookie<'static>> {
        resp.response()
            .cookies()
            .find(|cookie| cookie.name() == AppConfig::default().session.cookie_name)
            .map(|cookie| cookie.into_owned())
    }

    fn location<B>(resp: &ServiceResponse<B>) -> &str {
        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Store with the wizard at `allowed_max` and [`PASSWORD`] set.
    fn store_at(allowed_max: u32) -> MemoryStore {
        let hash = PasswordService::hash_password(PASSWORD).expect("should hash");
        let mut edit = WizardService::marker_edit(allowed_max);
        edit.merge(PasswordService::credential_edit(&hash));
        MemoryStore::with_edit(edit)
    }

    fn csrf_token(body: &Value) -> String {
        body["csrfToken"].as_str().unwrap_or_default().to_string()
    }

    fn marker(store: &MemoryStore) -> Option<String> {
        store
            .snapshot()
            .value("foris.wizard.allowed_step_max")
            .map(str::to_string)
    }

    mod wizard {
        use super::*;

        #[tokio::test]
        async fn fresh_appliance_lands_in_wizard() {
            let app = app!(MemoryStore::new());

            let resp = get!(app, "/", None::<Cookie>);

            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/wizard/");
        }

        #[tokio::test]
        async fn first_step_sets_password_and_advances() {
            let store = MemoryStore::new();
            let app = app!(store.clone());

            let resp = get!(app, "/wizard/step/1", None::<Cookie>);
            assert_eq!(resp.status(), StatusCode::OK);
            let cookie = session_cookie(&resp);
            let page: Value = test::read_body_json(resp).await;
            let token = page["csrfToken"].as_str().unwrap().to_string();
            assert_eq!(page["fields"][0], "password");

            let resp = post!(
                app,
                "/wizard/step/1",
                cookie,
                [
                    ("csrf_token", token.as_str()),
                    ("password", "123456"),
                    ("password_validation", "123456"),
                ]
            );
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/wizard/step/2");
            let cookie = session_cookie(&resp).or(cookie);

            assert_eq!(marker(&store).as_deref(), Some("2"));
            let snapshot = store.snapshot();
            assert_eq!(
                PasswordService::check_against(PasswordService::stored_hash(&snapshot), "123456"),
                CredentialCheck::Matches
            );

            let resp = get!(app, "/wizard/step/3", cookie);
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/wizard/step/2");

            let resp = get!(app, "/wizard/step/2", cookie);
            assert_eq!(resp.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn overview_lists_steps() {
            let app = app!(MemoryStore::new());

            let resp = get!(app, "/wizard/", None::<Cookie>);
            assert_eq!(resp.status(), StatusCode::OK);
            let overview: Value = test::read_body_json(resp).await;

            assert_eq!(overview["allowedStepMax"], 0);
            assert_eq!(overview["steps"].as_array().unwrap().len(), 6);
            assert_eq!(overview["steps"][0]["available"], true);
            assert_eq!(overview["steps"][1]["available"], false);
        }

        #[tokio::test]
        async fn password_mismatch_is_rejected() {
            let store = MemoryStore::new();
            let app = app!(store.clone());

            let resp = get!(app, "/wizard/step/1", None::<Cookie>);
            let cookie = session_cookie(&resp);
            let page: Value = test::read_body_json(resp).await;
            let token = page["csrfToken"].as_str().unwrap().to_string();

            let resp = post!(
                app,
                "/wizard/step/1",
                cookie,
                [
                    ("csrf_token", token.as_str()),
                    ("password", "123456"),
                    ("password_validation", "654321"),
                ]
            );

            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert!(!body["errors"].as_array().unwrap().is_empty());
            assert_eq!(marker(&store), None);
            assert!(store.applied().is_empty());
        }

        #[tokio::test]
        async fn missing_csrf_token_sends_to_login() {
            let store = MemoryStore::new();
            let app = app!(store.clone());

            let resp = get!(app, "/wizard/step/1", None::<Cookie>);
            let cookie = session_cookie(&resp);

            let resp = post!(
                app,
                "/wizard/step/1",
                cookie,
                [("password", "123456"), ("password_validation", "123456")]
            );

            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/?next=%2Fwizard%2Fstep%2F1");
            assert!(store.applied().is_empty());
        }

        #[tokio::test]
        async fn unconfirmed_step_is_reported() {
            let store = MemoryStore::new();
            let app = app!(store.clone());

            let resp = get!(app, "/wizard/step/1", None::<Cookie>);
            let cookie = session_cookie(&resp);
            let page: Value = test::read_body_json(resp).await;
            let token = page["csrfToken"].as_str().unwrap().to_string();
            let form = [
                ("csrf_token", token.as_str()),
                ("password", "123456"),
                ("password_validation", "123456"),
            ];

            store.fail_next_apply(StoreError::Timeout);
            let resp = post!(app, "/wizard/step/1", cookie, form);

            assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(test::read_body(resp).await, STEP_NOT_CONFIRMED);
            assert_eq!(marker(&store), None);

            store.commit_then_fail_next_apply(StoreError::Timeout);
            let resp = post!(app, "/wizard/step/1", cookie, form);

            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/wizard/step/2");
            assert_eq!(marker(&store).as_deref(), Some("2"));
        }
    }

    mod auth {
        use super::*;

        #[tokio::test]
        async fn anonymous_requests_are_sent_to_login() {
            let app = app!(store_at(3));

            let resp = get!(app, "/wizard/step/2", None::<Cookie>);
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/?next=%2Fwizard%2Fstep%2F2");

            let resp = get!(app, "/config/", None::<Cookie>);
            assert_eq!(location(&resp), "/?next=%2Fconfig%2F");
        }

        #[tokio::test]
        async fn anonymous_step_submission_is_forbidden() {
            let store = store_at(3);
            let app = app!(store.clone());

            let resp = get!(app, "/", None::<Cookie>);
            assert_eq!(resp.status(), StatusCode::OK);
            let cookie = session_cookie(&resp);
            let surface: Value = test::read_body_json(resp).await;
            let token = surface["csrfToken"].as_str().unwrap().to_string();

            let resp = post!(
                app,
                "/wizard/step/3",
                cookie,
                [("csrf_token", token.as_str())]
            );

            assert_eq!(resp.status(), StatusCode::FORBIDDEN);
            assert_eq!(marker(&store).as_deref(), Some("3"));
        }

        #[tokio::test]
        async fn login_resumes_requested_page() {
            let app = app!(store_at(3));

            let resp = get!(app, "/?next=%2Fwizard%2Fstep%2F2", None::<Cookie>);
            assert_eq!(resp.status(), StatusCode::OK);
            let cookie = session_cookie(&resp);
            let surface: Value = test::read_body_json(resp).await;
            assert_eq!(surface["next"], "/wizard/step/2");
            assert_eq!(surface["luciPath"], "/cgi-bin/luci");
            let token = surface["csrfToken"].as_str().unwrap().to_string();

            let resp = post!(
                app,
                "/",
                cookie,
                [
                    ("csrf_token", token.as_str()),
                    ("password", "wrong"),
                    ("next", "/wizard/step/2"),
                ]
            );
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/?next=%2Fwizard%2Fstep%2F2");
            let cookie = session_cookie(&resp).or(cookie);

            let resp = get!(app, "/", cookie);
            let cookie = session_cookie(&resp).or(cookie);
            let surface: Value = test::read_body_json(resp).await;
            assert_eq!(surface["messages"][0]["text"], LOGIN_FAILED_MESSAGE);
            assert_eq!(surface["csrfToken"], token.as_str());

            let resp = post!(
                app,
                "/",
                cookie,
                [
                    ("csrf_token", token.as_str()),
                    ("password", PASSWORD),
                    ("next", "/wizard/step/2"),
                ]
            );
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/wizard/step/2");
            let cookie = session_cookie(&resp).or(cookie);

            let resp = get!(app, "/wizard/step/2", cookie);
            assert_eq!(resp.status(), StatusCode::OK);
            assert!(resp.headers().get(header::CACHE_CONTROL).is_some());
            let page: Value = test::read_body_json(resp).await;
            assert_ne!(page["csrfToken"], token.as_str());
        }

        #[tokio::test]
        async fn login_requires_csrf_token() {
            let app = app!(store_at(3));

            let resp = get!(app, "/", None::<Cookie>);
            let cookie = session_cookie(&resp);
            let surface: Value = test::read_body_json(resp).await;
            let token = csrf_token(&surface);

            for form in [
                vec![("password", PASSWORD), ("next", "/config/")],
                vec![
                    ("csrf_token", "forged"),
                    ("password", PASSWORD),
                    ("next", "/config/"),
                ],
            ] {
                let resp = post!(app, "/", cookie, form);
                assert_eq!(resp.status(), StatusCode::FOUND);
                assert_eq!(location(&resp), "/");
            }

            let resp = get!(app, "/config/", cookie);
            assert_eq!(location(&resp), "/?next=%2Fconfig%2F");

            let resp = get!(app, "/", cookie);
            let surface: Value = test::read_body_json(resp).await;
            assert_eq!(csrf_token(&surface), token);
            assert!(surface["messages"].as_array().unwrap().is_empty());
        }

        #[tokio::test]
        async fn idle_session_is_replaced() {
            let sessions = MemorySessionStore::new();
            let app = app!(store_at(7), sessions.clone());

            let resp = get!(app, "/", None::<Cookie>);
            let cookie = session_cookie(&resp);
            let surface: Value = test::read_body_json(resp).await;
            let token = csrf_token(&surface);

            let resp = post!(
                app,
                "/",
                cookie,
                [("csrf_token", token.as_str()), ("password", PASSWORD)]
            );
            let cookie = session_cookie(&resp).or(cookie);
            let resp = get!(app, "/config/", cookie);
            assert_eq!(resp.status(), StatusCode::OK);

            sessions.edit_records(|record| {
                let Some(state) = record.get_mut(SESSION_STATE_KEY) else {
                    return;
                };
                let mut value: Value = serde_json::from_str(state).unwrap();
                value["last_seen"] = 0.into();
                *state = value.to_string();
            });

            let resp = get!(app, "/config/", cookie);
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/?next=%2Fconfig%2F");
            let cookie = session_cookie(&resp).or(cookie);

            let resp = get!(app, "/", cookie);
            assert_eq!(resp.status(), StatusCode::OK);
            let surface: Value = test::read_body_json(resp).await;
            assert_eq!(surface["messages"][0]["level"], "info");
            assert_eq!(surface["messages"][0]["text"], SESSION_EXPIRED_MESSAGE);
            assert_ne!(csrf_token(&surface), token);
        }

        #[tokio::test]
        async fn stored_password_ends_auto_authentication() {
            let store = MemoryStore::new();
            PasswordService::store_password(&store, "secret123")
                .await
                .unwrap();
            let app = app!(store.clone());

            let resp = get!(app, "/config/", None::<Cookie>);

            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/?next=%2Fconfig%2F");
        }

        #[tokio::test]
        async fn credential_without_marker_requires_login() {
            let hash = PasswordService::hash_password(PASSWORD).expect("should hash");
            let app = app!(MemoryStore::with_edit(PasswordService::credential_edit(
                &hash
            )));

            let resp = get!(app, "/wizard/step/1", None::<Cookie>);
            assert_eq!(location(&resp), "/?next=%2Fwizard%2Fstep%2F1");

            let resp = get!(app, "/", None::<Cookie>);
            assert_eq!(resp.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn unsafe_next_is_ignored() {
            let app = app!(store_at(3));

            let resp = get!(app, "/", None::<Cookie>);
            let cookie = session_cookie(&resp);
            let surface: Value = test::read_body_json(resp).await;
            let token = surface["csrfToken"].as_str().unwrap().to_string();

            let resp = post!(
                app,
                "/",
                cookie,
                [
                    ("csrf_token", token.as_str()),
                    ("password", PASSWORD),
                    ("next", "//evil.example.com/"),
                ]
            );

            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/");
        }

        #[tokio::test]
        async fn completed_wizard_lands_in_config() {
            let app = app!(store_at(7));

            let resp = get!(app, "/", None::<Cookie>);
            let cookie = session_cookie(&resp);
            let surface: Value = test::read_body_json(resp).await;
            let token = surface["csrfToken"].as_str().unwrap().to_string();

            let resp = post!(
                app,
                "/",
                cookie,
                [("csrf_token", token.as_str()), ("password", PASSWORD)]
            );
            assert_eq!(location(&resp), "/");
            let cookie = session_cookie(&resp).or(cookie);

            let resp = get!(app, "/", cookie);
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/config/");

            let resp = get!(app, "/wizard/", cookie);
            assert_eq!(location(&resp), "/config/");

            let resp = get!(app, "/config/network/", cookie);
            assert_eq!(resp.status(), StatusCode::OK);
            let panel: Value = test::read_body_json(resp).await;
            assert_eq!(panel["page"], "network");
            assert_eq!(panel["wizardCompleted"], true);
        }

        #[tokio::test]
        async fn logout_ends_session() {
            let app = app!(store_at(7));

            let resp = get!(app, "/", None::<Cookie>);
            let cookie = session_cookie(&resp);
            let surface: Value = test::read_body_json(resp).await;
            let token = surface["csrfToken"].as_str().unwrap().to_string();

            let resp = post!(
                app,
                "/",
                cookie,
                [("csrf_token", token.as_str()), ("password", PASSWORD)]
            );
            let cookie = session_cookie(&resp).or(cookie);

            let resp = get!(app, "/config/", cookie);
            assert_eq!(resp.status(), StatusCode::OK);

            let resp = get!(app, "/logout", cookie);
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/");

            // the browser may keep sending the old cookie
            let resp = get!(app, "/config/", cookie);
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/?next=%2Fconfig%2F");
        }

        #[tokio::test]
        async fn store_outage_on_index_is_generic() {
            let store = store_at(3);
            let app = app!(store.clone());

            store.fail_next_query(StoreError::Unreachable("gone".to_string()));
            let resp = get!(app, "/", None::<Cookie>);

            assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(test::read_body(resp).await, STORE_UNAVAILABLE);
        }
    }

    mod language {
        use super::*;

        #[tokio::test]
        async fn switching_language_returns_to_backlink() {
            let store = MemoryStore::new();
            let app = app!(store.clone());

            let resp = get!(app, "/lang/en?backlink=/config/", None::<Cookie>);

            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(location(&resp), "/config/");
            assert_eq!(store.snapshot().value("foris.settings.lang"), Some("en"));
            assert_eq!(store.snapshot().value("luci.main.lang"), Some("en"));

            let resp = get!(app, "/lang/cs?backlink=//evil.example.com/", None::<Cookie>);
            assert_eq!(location(&resp), "/");
        }

        #[tokio::test]
        async fn unknown_language_is_not_found() {
            let store = MemoryStore::new();
            let app = app!(store.clone());

            let resp = get!(app, "/lang/de", None::<Cookie>);

            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            assert_eq!(
                test::read_body(resp).await,
                "Language 'de' is not available."
            );
            assert!(store.applied().is_empty());
        }
    }
}
