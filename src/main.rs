use std::{process, sync::Arc};

use popcache::{
    application::{error::AppError, popular::CommentPopularityService, repos::ScoreSource},
    cache::{
        CONDITIONAL_INCR_NUM_KEYS, CONDITIONAL_INCR_SCRIPT, CONDITIONAL_INCR_SCRIPT_NAME,
        MemoryStore, PopularityCache, SortedSetStore,
    },
    config::{self, RankingArgs, RecordArgs, StoreKind},
    domain::entities::ScoreEntry,
    infra::{
        db::{PostgresRepositories, ScopeFilter},
        error::InfraError,
        redis_store::RedisStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Migrate(_) => run_migrate(&settings).await,
        config::Command::InitScripts(_) => run_init_scripts(&settings).await,
        config::Command::Ranking(args) => run_ranking(&settings, args).await,
        config::Command::Record(args) => run_record(&settings, args).await,
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let pool = connect_pool(settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!(target = "popcache::migrate", "database migrations applied");
    Ok(())
}

async fn run_init_scripts(settings: &config::Settings) -> Result<(), AppError> {
    let store = build_store(settings).await?;
    let handle = store
        .script_registry()
        .register(
            CONDITIONAL_INCR_SCRIPT_NAME,
            CONDITIONAL_INCR_SCRIPT,
            CONDITIONAL_INCR_NUM_KEYS,
        )
        .await?;
    info!(
        target = "popcache::init_scripts",
        script = CONDITIONAL_INCR_SCRIPT_NAME,
        sha = %handle.sha(),
        "store scripts registered"
    );
    Ok(())
}

async fn run_ranking(settings: &config::Settings, args: RankingArgs) -> Result<(), AppError> {
    let service = build_service(settings).await?;

    let slice = service
        .get_by_action_type(&args.asset_id, &args.action_type, args.limit, args.offset)
        .await;
    service.shutdown().await;

    print_ranking(&slice?, args.json)
}

async fn run_record(settings: &config::Settings, args: RecordArgs) -> Result<(), AppError> {
    let service = build_service(settings).await?;

    let result = if args.delete {
        service
            .decrement_comment_action(&args.asset_id, &args.action_type, &args.comment_id)
            .await?
    } else {
        service
            .increment_comment_action(&args.asset_id, &args.action_type, &args.comment_id)
            .await?
    };

    match result {
        Some(score) => println!("{} {}", args.comment_id, score),
        None => info!(
            target = "popcache::record",
            asset_id = %args.asset_id,
            action_type = %args.action_type,
            "ranking not cached; increment skipped"
        ),
    }
    Ok(())
}

fn print_ranking(slice: &[ScoreEntry], json: bool) -> Result<(), AppError> {
    if json {
        let rendered = serde_json::to_string_pretty(slice)
            .map_err(|err| AppError::unexpected(format!("failed to encode ranking: {err}")))?;
        println!("{rendered}");
        return Ok(());
    }

    for entry in slice {
        println!("{}\t{}", entry.item_id, entry.count);
    }
    Ok(())
}

async fn build_service(settings: &config::Settings) -> Result<CommentPopularityService, AppError> {
    let pool = connect_pool(settings).await?;
    let scope_filter = if settings.popular.top_level_only {
        ScopeFilter::TopLevelOnly
    } else {
        ScopeFilter::AllComments
    };
    let source: Arc<dyn ScoreSource> = Arc::new(PostgresRepositories::new(pool, scope_filter));

    let store = build_store(settings).await?;
    let cache = Arc::new(PopularityCache::new(store, source));
    Ok(CommentPopularityService::start(cache).await?)
}

async fn build_store(settings: &config::Settings) -> Result<SortedSetStore, AppError> {
    match settings.popular.store {
        StoreKind::Redis => {
            let store = RedisStore::connect(&settings.redis)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            Ok(SortedSetStore::new(Arc::new(store)))
        }
        StoreKind::Memory => Ok(SortedSetStore::new(Arc::new(MemoryStore::new()))),
    }
}

async fn connect_pool(settings: &config::Settings) -> Result<sqlx::PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}
