use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use threadline::net::api::{DEFAULT_COMMENT_PAGE_SIZE, DEFAULT_NOTIFICATION_PAGE_SIZE, DEFAULT_POST_PAGE_SIZE};
use threadline::net::types::{Comment, CommentInput, Post};
use threadline::{
    ApiClient, ApiError, AuthApi, AuthError, ClientConfig, ConfigError, FileStorage, Page, RealtimeChannel, RealtimeEvent,
    RegistrationError, SessionStore, WsConnector,
};
use tracing_subscriber::EnvFilter;

#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not logged in; run `threadline login` first")]
    NotLoggedIn,
    #[error("session expired; run `threadline login` again")]
    SessionExpired,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(ApiError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl From<ApiError> for CliError {
    fn from(error: ApiError) -> Self {
        if error.is_unauthorized() { Self::SessionExpired } else { Self::Api(error) }
    }
}

#[derive(Parser, Debug)]
#[command(name = "threadline", about = "Threadline posts, comments and live updates")]
struct Cli {
    /// REST API origin; overrides THREADLINE_API_URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Directory holding the saved session; overrides THREADLINE_STATE_DIR.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and save the session.
    Login {
        email: String,
        #[arg(long, env = "THREADLINE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account, then log in with it.
    Register {
        username: String,
        email: String,
        #[arg(long, env = "THREADLINE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "")]
        full_name: String,
    },
    Logout,
    /// Print the logged-in user.
    Whoami {
        /// Re-fetch the profile from the server instead of the saved session.
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Newest posts from everyone.
    Feed(PageArgs),
    /// Posts by one user.
    Posts {
        user_id: String,
        #[command(flatten)]
        page: PageArgs,
    },
    Post(PostCommand),
    Comment(CommentCommand),
    Notifications(NotificationCommand),
    Admin(AdminCommand),
    /// Stream realtime events as JSON lines until Ctrl-C.
    Watch {
        /// Only print events of these types, e.g. `post_created`.
        #[arg(long = "kind")]
        kinds: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    limit: Option<u32>,
}

impl PageArgs {
    fn resolve(self, default_limit: u32) -> Page {
        Page::new(self.page, self.limit.unwrap_or(default_limit))
    }
}

#[derive(Args, Debug)]
struct PostCommand {
    #[command(subcommand)]
    command: PostSubcommand,
}

#[derive(Subcommand, Debug)]
enum PostSubcommand {
    Show { post_id: i64 },
    Create { content: String },
    Update { post_id: i64, content: String },
    Delete { post_id: i64 },
    Like { post_id: i64 },
}

#[derive(Args, Debug)]
struct CommentCommand {
    #[command(subcommand)]
    command: CommentSubcommand,
}

#[derive(Subcommand, Debug)]
enum CommentSubcommand {
    List {
        post_id: i64,
        #[command(flatten)]
        page: PageArgs,
    },
    Create {
        post_id: i64,
        content: String,
        /// Reply to this comment instead of the post.
        #[arg(long)]
        parent: Option<i64>,
    },
    Update {
        comment_id: i64,
        content: String,
    },
    Delete {
        comment_id: i64,
    },
    Like {
        comment_id: i64,
    },
}

#[derive(Args, Debug)]
struct NotificationCommand {
    #[command(subcommand)]
    command: NotificationSubcommand,
}

#[derive(Subcommand, Debug)]
enum NotificationSubcommand {
    List(PageArgs),
    Read { notification_id: i64 },
    ReadAll,
    Delete { notification_id: i64 },
}

#[derive(Args, Debug)]
struct AdminCommand {
    #[command(subcommand)]
    command: AdminSubcommand,
}

#[derive(Subcommand, Debug)]
enum AdminSubcommand {
    Analytics,
    Moderation,
    Health,
}

struct App {
    config: ClientConfig,
    api: Arc<ApiClient>,
    session: Arc<SessionStore>,
}

impl App {
    fn token(&self) -> Result<String, CliError> {
        self.session.token().ok_or(CliError::NotLoggedIn)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(ClientConfig::from_env()?, cli.api_url.as_deref(), cli.state_dir)?;
    let api = Arc::new(ApiClient::new(&config)?);
    let storage = Arc::new(FileStorage::new(&config.storage_dir));
    let session = Arc::new(SessionStore::init(api.clone(), storage));
    let app = App { config, api, session };

    match cli.command {
        Command::Login { email, password } => {
            app.session.login(&email, &password).await?;
            print_user(&app)
        }
        Command::Register { username, email, password, full_name } => {
            app.session.register(&username, &email, &password, &full_name).await?;
            print_user(&app)
        }
        Command::Logout => {
            app.session.logout();
            eprintln!("logged out");
            Ok(())
        }
        Command::Whoami { refresh } => run_whoami(&app, refresh).await,
        Command::Feed(page) => {
            let posts = app.api.list_posts(&app.token()?, page.resolve(DEFAULT_POST_PAGE_SIZE)).await?;
            print_posts(&posts)
        }
        Command::Posts { user_id, page } => {
            let page = page.resolve(DEFAULT_POST_PAGE_SIZE);
            let posts = app.api.list_user_posts(&app.token()?, &user_id, page).await?;
            print_posts(&posts)
        }
        Command::Post(post) => run_post(&app, post).await,
        Command::Comment(comment) => run_comment(&app, comment).await,
        Command::Notifications(notifications) => run_notifications(&app, notifications).await,
        Command::Admin(admin) => run_admin(&app, admin).await,
        Command::Watch { kinds } => run_watch(&app, &kinds).await,
    }
}

/// Apply command-line overrides on top of the environment config.
fn resolve_config(
    mut config: ClientConfig,
    api_url: Option<&str>,
    state_dir: Option<PathBuf>,
) -> Result<ClientConfig, CliError> {
    if let Some(api_url) = api_url {
        config = config.with_api_base_url(api_url)?;
    }
    if let Some(dir) = state_dir {
        config.storage_dir = dir;
    }
    Ok(config)
}

async fn run_whoami(app: &App, refresh: bool) -> Result<(), CliError> {
    if refresh {
        let user = app.api.current_user(&app.token()?).await?;
        return print_json(&user);
    }
    print_user(app)
}

async fn run_post(app: &App, post: PostCommand) -> Result<(), CliError> {
    let token = app.token()?;
    match post.command {
        PostSubcommand::Show { post_id } => {
            let post = app.api.get_post(&token, post_id).await?;
            print_json(&post_view(&post)?)
        }
        PostSubcommand::Create { content } => {
            let post = app.api.create_post(&token, &content).await?;
            print_json(&post_view(&post)?)
        }
        PostSubcommand::Update { post_id, content } => {
            let post = app.api.update_post(&token, post_id, &content).await?;
            print_json(&post_view(&post)?)
        }
        PostSubcommand::Delete { post_id } => {
            app.api.delete_post(&token, post_id).await?;
            eprintln!("deleted post {post_id}");
            Ok(())
        }
        PostSubcommand::Like { post_id } => {
            app.api.like_post(&token, post_id).await?;
            eprintln!("liked post {post_id}");
            Ok(())
        }
    }
}

async fn run_comment(app: &App, comment: CommentCommand) -> Result<(), CliError> {
    let token = app.token()?;
    match comment.command {
        CommentSubcommand::List { post_id, page } => {
            let page = page.resolve(DEFAULT_COMMENT_PAGE_SIZE);
            let comments = app.api.list_post_comments(&token, post_id, page).await?;
            let views = comments.iter().map(comment_view).collect::<Result<Vec<_>, _>>()?;
            print_json(&views)
        }
        CommentSubcommand::Create { post_id, content, parent } => {
            let input = CommentInput { content, post_id, parent_id: parent };
            let comment = app.api.create_comment(&token, &input).await?;
            print_json(&comment_view(&comment)?)
        }
        CommentSubcommand::Update { comment_id, content } => {
            let comment = app.api.update_comment(&token, comment_id, &content).await?;
            print_json(&comment_view(&comment)?)
        }
        CommentSubcommand::Delete { comment_id } => {
            app.api.delete_comment(&token, comment_id).await?;
            eprintln!("deleted comment {comment_id}");
            Ok(())
        }
        CommentSubcommand::Like { comment_id } => {
            app.api.like_comment(&token, comment_id).await?;
            eprintln!("liked comment {comment_id}");
            Ok(())
        }
    }
}

async fn run_notifications(app: &App, notifications: NotificationCommand) -> Result<(), CliError> {
    let token = app.token()?;
    match notifications.command {
        NotificationSubcommand::List(page) => {
            let page = page.resolve(DEFAULT_NOTIFICATION_PAGE_SIZE);
            print_json(&app.api.list_notifications(&token, page).await?)
        }
        NotificationSubcommand::Read { notification_id } => {
            app.api.mark_notification_read(&token, notification_id).await?;
            Ok(())
        }
        NotificationSubcommand::ReadAll => {
            app.api.mark_all_notifications_read(&token).await?;
            Ok(())
        }
        NotificationSubcommand::Delete { notification_id } => {
            app.api.delete_notification(&token, notification_id).await?;
            Ok(())
        }
    }
}

async fn run_admin(app: &App, admin: AdminCommand) -> Result<(), CliError> {
    let token = app.token()?;
    match admin.command {
        AdminSubcommand::Analytics => print_json(&app.api.analytics(&token).await?),
        AdminSubcommand::Moderation => print_json(&app.api.moderation_stats(&token).await?),
        AdminSubcommand::Health => print_json(&app.api.system_health(&token).await?),
    }
}

async fn run_watch(app: &App, kinds: &[String]) -> Result<(), CliError> {
    if !app.session.is_authenticated() {
        return Err(CliError::NotLoggedIn);
    }

    let channel = RealtimeChannel::init(&app.config, app.session.clone(), Arc::new(WsConnector));
    channel.observe_status(|status| tracing::info!(?status, "watch: connection status"));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RealtimeEvent>();
    let _subscription = channel
        .subscribe_and_connect(move |event| {
            let _ = tx.send(event.clone());
        })
        .await;

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            Some(event) = rx.recv() => {
                if let Err(e) = print_event(kinds, &event) {
                    break Err(e);
                }
            }
        }
    };

    channel.teardown();
    result
}

fn print_event(kinds: &[String], event: &RealtimeEvent) -> Result<(), CliError> {
    if let Some(line) = render_event(kinds, event)? {
        println!("{line}");
    }
    Ok(())
}

/// One JSON line for `event`, or `None` when the kind filter excludes it.
fn render_event(kinds: &[String], event: &RealtimeEvent) -> Result<Option<String>, CliError> {
    if !wants_event(kinds, event) {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(event)?))
}

fn wants_event(kinds: &[String], event: &RealtimeEvent) -> bool {
    kinds.is_empty() || kinds.iter().any(|kind| kind == event.kind())
}

fn print_user(app: &App) -> Result<(), CliError> {
    let user = app.session.user().ok_or(CliError::NotLoggedIn)?;
    print_json(&user)
}

fn print_posts(posts: &[Post]) -> Result<(), CliError> {
    let views = posts.iter().map(post_view).collect::<Result<Vec<_>, _>>()?;
    print_json(&views)
}

fn post_view(post: &Post) -> Result<Value, CliError> {
    with_warning(post, post.warning_message())
}

fn comment_view(comment: &Comment) -> Result<Value, CliError> {
    with_warning(comment, comment.warning_message())
}

/// Serialize `item`, adding a `warning` field when moderation flagged it.
fn with_warning<T: Serialize>(item: &T, warning: Option<String>) -> Result<Value, CliError> {
    let mut value = serde_json::to_value(item)?;
    if let (Some(warning), Some(map)) = (warning, value.as_object_mut()) {
        map.insert("warning".to_owned(), Value::String(warning));
    }
    Ok(value)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
