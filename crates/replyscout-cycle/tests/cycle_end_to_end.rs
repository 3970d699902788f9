use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use replyscout_adapters::{
    AdapterError, ContentSurface, Diagnostics, EngagementSurface, FailureContext, PostResult,
    Session, SessionProvider,
};
use replyscout_core::{
    BotConfig, CycleConfig, Credentials, FilterRuleSet, PacingBounds, RawItem, ReplyTemplate,
};
use replyscout_cycle::{
    run_with_provider, shutdown_channel, CandidateOutcome, CycleScheduler, CycleState,
    RuntimeConfig, Shutdown, ShutdownTrigger,
};
use replyscout_storage::DedupStore;
use tempfile::tempdir;
use tokio::time::Instant;

const CTAS: [&str; 2] = ["Cek profil kami ya!", "DM untuk detail."];

#[derive(Default)]
struct Journal {
    searches: Vec<String>,
    /// Whole seconds since the session opened, per search.
    search_times: Vec<u64>,
    probes: Vec<String>,
    posts: Vec<(String, String)>,
    artifacts: Vec<String>,
    post_times: Vec<u64>,
    closed: bool,
}

type SharedJournal = Arc<Mutex<Journal>>;

/// Serves a fixed batch per query; unknown queries fail the search.
struct ScriptedContent {
    journal: SharedJournal,
    results: HashMap<String, Vec<RawItem>>,
    current: Vec<RawItem>,
    opened: Instant,
}

#[async_trait]
impl ContentSurface for ScriptedContent {
    async fn search(&mut self, query: &str) -> Result<bool, AdapterError> {
        {
            let mut journal = self.journal.lock().unwrap();
            journal.searches.push(query.to_string());
            journal.search_times.push(self.opened.elapsed().as_secs());
        }
        match self.results.get(query) {
            Some(items) => {
                self.current = items.clone();
                Ok(true)
            }
            None => Err(AdapterError::Message(format!("search page for {query} timed out"))),
        }
    }

    async fn current_batch(&mut self) -> Result<Vec<RawItem>, AdapterError> {
        Ok(self.current.clone())
    }

    async fn scroll_next(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.journal.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Probe {
    NotEngaged,
    Engaged,
    Broken,
}

struct ScriptedEngagement {
    journal: SharedJournal,
    probe: Probe,
    post_succeeds: bool,
}

#[async_trait]
impl EngagementSurface for ScriptedEngagement {
    async fn already_engaged(&mut self, url: &str, _my_identity: &str) -> Result<bool, AdapterError> {
        self.journal.lock().unwrap().probes.push(url.to_string());
        match self.probe {
            Probe::NotEngaged => Ok(false),
            Probe::Engaged => Ok(true),
            Probe::Broken => Err(AdapterError::Message("thread did not load".into())),
        }
    }

    async fn post_reply(&mut self, url: &str, text: &str) -> PostResult {
        self.journal
            .lock()
            .unwrap()
            .posts
            .push((url.to_string(), text.to_string()));
        if self.post_succeeds {
            PostResult::Posted
        } else {
            PostResult::Failed("reply box never appeared".into())
        }
    }
}

struct RecordingDiagnostics {
    journal: SharedJournal,
}

#[async_trait]
impl Diagnostics for RecordingDiagnostics {
    async fn capture_failure_artifact(&self, label: &str, _context: &FailureContext) {
        self.journal.lock().unwrap().artifacts.push(label.to_string());
    }
}

fn fresh_item(id: u32, text: &str) -> RawItem {
    RawItem {
        url: Some(format!("https://x.com/klien/status/{id}")),
        text: Some(text.to_string()),
        author: Some("Klien @klien".to_string()),
        timestamp: Some((Utc::now() - Duration::days(1)).to_rfc3339()),
    }
}

fn session(
    journal: &SharedJournal,
    results: HashMap<String, Vec<RawItem>>,
    probe: Probe,
    post_succeeds: bool,
) -> Session {
    Session {
        identity: "scoutbot".into(),
        opened_at: Utc::now(),
        content: Box::new(ScriptedContent {
            journal: journal.clone(),
            results,
            current: Vec::new(),
            opened: Instant::now(),
        }),
        engagement: Box::new(ScriptedEngagement {
            journal: journal.clone(),
            probe,
            post_succeeds,
        }),
        diagnostics: Arc::new(RecordingDiagnostics {
            journal: journal.clone(),
        }),
    }
}

fn rules() -> FilterRuleSet {
    FilterRuleSet::new(
        &["butuh".into(), "cari".into()],
        &["jasa".into()],
        &["promo".into()],
        &["admin".into()],
    )
}

fn template() -> ReplyTemplate {
    ReplyTemplate {
        base: "{Halo|Hai} kak,".into(),
        details: vec!["kami {bisa|siap} bantu.".into()],
        cta_options: CTAS.iter().map(|s| s.to_string()).collect(),
    }
}

fn one_cycle() -> CycleConfig {
    let mut config = CycleConfig::unpaced(3);
    config.max_cycles = Some(1);
    config
}

fn single_query() -> HashMap<String, Vec<RawItem>> {
    HashMap::from([(
        "\"butuh jasa\"".to_string(),
        vec![fresh_item(9001, "lagi butuh jasa desain logo nih")],
    )])
}

async fn run_single_query(probe: Probe, post_succeeds: bool) -> (SharedJournal, DedupStore, Vec<replyscout_cycle::CycleSummary>) {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let mut session = session(&journal, single_query(), probe, post_succeeds);

    let summary = {
        let mut scheduler = CycleScheduler::new(
            one_cycle(),
            rules(),
            template(),
            vec!["\"butuh jasa\"".into()],
            &mut store,
            Shutdown::never(),
        );
        scheduler.run(&mut session).await
    };

    let reloaded = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("reload");
    drop(store);
    (journal, reloaded, summary.cycles)
}

#[tokio::test]
async fn passing_candidate_gets_one_reply_with_a_verbatim_cta() {
    let (journal, store, cycles) = run_single_query(Probe::NotEngaged, true).await;
    let journal = journal.lock().unwrap();

    assert_eq!(journal.posts.len(), 1);
    let (url, reply) = &journal.posts[0];
    assert_eq!(url, "https://x.com/klien/status/9001");
    assert!(!reply.is_empty());
    assert!(CTAS.iter().any(|cta| reply.ends_with(cta)), "{reply}");

    assert!(store.contains("9001"));
    assert_eq!(store.len(), 1);
    assert_eq!(cycles[0].posted, 1);
}

#[tokio::test]
async fn failed_post_keeps_the_dedup_record() {
    let (journal, store, cycles) = run_single_query(Probe::NotEngaged, false).await;
    let journal = journal.lock().unwrap();

    assert_eq!(journal.posts.len(), 1);
    assert!(store.contains("9001"));
    assert_eq!(store.len(), 1);
    assert_eq!(cycles[0].post_failures, 1);
    assert_eq!(journal.artifacts, vec!["reply_error".to_string()]);
}

#[tokio::test]
async fn engaged_thread_is_recorded_without_replying() {
    let (journal, store, cycles) = run_single_query(Probe::Engaged, true).await;
    let journal = journal.lock().unwrap();

    assert!(journal.posts.is_empty());
    assert!(store.contains("9001"));
    assert_eq!(cycles[0].skipped_engaged, 1);
}

#[tokio::test]
async fn probe_failure_abandons_the_candidate_unrecorded() {
    let (journal, store, cycles) = run_single_query(Probe::Broken, true).await;
    let journal = journal.lock().unwrap();

    assert!(journal.posts.is_empty());
    assert!(!store.contains("9001"));
    assert_eq!(cycles[0].probe_failures, 1);
}

#[tokio::test]
async fn recorded_candidate_is_never_probed_or_posted_again() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("replied.txt");
    std::fs::write(&path, "9001\n").expect("seed");

    let journal = SharedJournal::default();
    let mut store = DedupStore::open(&path).await.expect("store");
    let mut session = session(&journal, single_query(), Probe::NotEngaged, true);
    let summary = CycleScheduler::new(
        one_cycle(),
        rules(),
        template(),
        vec!["\"butuh jasa\"".into()],
        &mut store,
        Shutdown::never(),
    )
    .run(&mut session)
    .await;

    let journal = journal.lock().unwrap();
    assert!(journal.probes.is_empty());
    assert!(journal.posts.is_empty());
    assert_eq!(summary.cycles[0].skipped_recorded, 1);
    assert_eq!(std::fs::read_to_string(&path).expect("log"), "9001\n");
}

#[tokio::test]
async fn failing_query_does_not_stop_the_others() {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let mut session = session(&journal, single_query(), Probe::NotEngaged, true);

    let summary = CycleScheduler::new(
        one_cycle(),
        rules(),
        template(),
        vec!["\"broken query\"".into(), "\"butuh jasa\"".into()],
        &mut store,
        Shutdown::never(),
    )
    .run(&mut session)
    .await;

    let cycle = &summary.cycles[0];
    assert_eq!(cycle.queries_run, 2);
    assert_eq!(cycle.queries_failed, 1);
    assert_eq!(cycle.posted, 1);

    let journal = journal.lock().unwrap();
    assert_eq!(journal.searches.len(), 2);
    assert!(journal.artifacts.contains(&"query_error".to_string()));
}

#[tokio::test]
async fn interrupt_before_start_runs_no_queries() {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let mut session = session(&journal, single_query(), Probe::NotEngaged, true);
    let (trigger, shutdown) = shutdown_channel();
    trigger.trigger();

    let mut config = one_cycle();
    config.max_cycles = None;
    let summary = CycleScheduler::new(
        config,
        rules(),
        template(),
        vec!["\"butuh jasa\"".into()],
        &mut store,
        shutdown,
    )
    .run(&mut session)
    .await;

    assert!(summary.interrupted);
    assert!(summary.cycles.is_empty());
    assert!(journal.lock().unwrap().searches.is_empty());
}

#[tokio::test]
async fn every_query_runs_once_per_cycle_in_some_order() {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let queries: Vec<String> = (0..6).map(|i| format!("\"q{i}\"")).collect();
    let results = queries
        .iter()
        .map(|q| (q.clone(), Vec::new()))
        .collect::<HashMap<_, _>>();
    let mut session = session(&journal, results, Probe::NotEngaged, true);

    let mut config = one_cycle();
    config.max_cycles = Some(3);
    let summary = CycleScheduler::new(config, rules(), template(), queries.clone(), &mut store, Shutdown::never())
        .run(&mut session)
        .await;
    assert_eq!(summary.cycles.len(), 3);

    let journal = journal.lock().unwrap();
    for cycle in journal.searches.chunks(6) {
        let mut seen = cycle.to_vec();
        seen.sort();
        let mut expected = queries.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn single_candidate_outcome_is_recorded_before_posting() {
    struct AssertingEngagement {
        log_path: std::path::PathBuf,
    }

    #[async_trait]
    impl EngagementSurface for AssertingEngagement {
        async fn already_engaged(&mut self, _url: &str, _me: &str) -> Result<bool, AdapterError> {
            Ok(false)
        }

        async fn post_reply(&mut self, _url: &str, _text: &str) -> PostResult {
            let log = std::fs::read_to_string(&self.log_path).unwrap_or_default();
            if log.lines().any(|l| l == "9001") {
                PostResult::Posted
            } else {
                PostResult::Failed("id was not durable before posting".into())
            }
        }
    }

    let dir = tempdir().expect("tempdir");
    let log_path = dir.path().join("replied.txt");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(&log_path).await.expect("store");
    let mut session = session(&journal, single_query(), Probe::NotEngaged, true);
    session.engagement = Box::new(AssertingEngagement {
        log_path: log_path.clone(),
    });

    let candidate = fresh_item(9001, "butuh jasa").to_candidate().expect("candidate");
    let mut scheduler = CycleScheduler::new(
        one_cycle(),
        rules(),
        template(),
        Vec::new(),
        &mut store,
        Shutdown::never(),
    );
    let outcome = scheduler
        .process_candidate(&mut session, "\"butuh jasa\"", &candidate)
        .await
        .expect("process");
    assert_eq!(outcome, CandidateOutcome::Posted);
}

struct FailingProvider;

#[async_trait]
impl SessionProvider for FailingProvider {
    async fn open_authenticated_session(&self, credentials: &Credentials) -> Result<Session, AdapterError> {
        Err(AdapterError::Authentication {
            identity: credentials.identity.clone(),
            reason: "password field never appeared".into(),
        })
    }
}

#[tokio::test]
async fn failed_login_is_fatal_and_captured() {
    let dir = tempdir().expect("tempdir");
    let config: BotConfig = serde_json::from_value(serde_json::json!({
        "settings": { "max_tweet_age_days": 3 },
        "search_terms": ["butuh jasa"],
        "intent_keywords": ["butuh"],
        "service_keywords": ["jasa"],
        "reply_template": { "base": "Hai", "details": ["kak"], "cta_options": ["DM ya"] },
        "sleep_timers": {
            "between_queries_min": 0, "between_queries_max": 0,
            "after_reply_min": 0, "after_reply_max": 0,
            "after_full_cycle_min": 0, "after_full_cycle_max": 0
        }
    }))
    .expect("config");
    let runtime = RuntimeConfig {
        config_path: dir.path().join("config.json"),
        state_file: dir.path().join("replied.txt"),
        fixtures_dir: dir.path().join("fixtures"),
        artifacts_dir: dir.path().join("artifacts"),
        outbox: dir.path().join("outbox.jsonl"),
        reports_dir: dir.path().join("reports"),
        log_file: dir.path().join("replyscout.log"),
        base_url: "https://x.com".into(),
        max_cycles: Some(1),
    };
    let credentials = Credentials {
        identity: "scoutbot".into(),
        secret: "secret".into(),
        recovery_contact: None,
    };
    let journal = SharedJournal::default();
    let diagnostics = Arc::new(RecordingDiagnostics {
        journal: journal.clone(),
    });

    let result = run_with_provider(
        &runtime,
        &config,
        &credentials,
        &FailingProvider,
        diagnostics,
        Shutdown::never(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(journal.lock().unwrap().artifacts, vec!["login_error".to_string()]);
}

/// Posts succeed or fail in script order. Can fire the interrupt from inside
/// the first post.
struct PacedEngagement {
    journal: SharedJournal,
    opened: Instant,
    outcomes: VecDeque<bool>,
    interrupt_on_post: Option<ShutdownTrigger>,
}

#[async_trait]
impl EngagementSurface for PacedEngagement {
    async fn already_engaged(&mut self, url: &str, _my_identity: &str) -> Result<bool, AdapterError> {
        self.journal.lock().unwrap().probes.push(url.to_string());
        Ok(false)
    }

    async fn post_reply(&mut self, url: &str, text: &str) -> PostResult {
        {
            let mut journal = self.journal.lock().unwrap();
            journal.posts.push((url.to_string(), text.to_string()));
            journal.post_times.push(self.opened.elapsed().as_secs());
        }
        if let Some(trigger) = self.interrupt_on_post.take() {
            trigger.trigger();
        }
        if self.outcomes.pop_front().unwrap_or(true) {
            PostResult::Posted
        } else {
            PostResult::Failed("reply box never appeared".into())
        }
    }
}

fn paced(between_queries: f64, after_reply: f64, after_full_cycle: f64) -> CycleConfig {
    let mut config = one_cycle();
    config.between_queries = PacingBounds::new(between_queries, between_queries);
    config.after_reply = PacingBounds::new(after_reply, after_reply);
    config.after_full_cycle = PacingBounds::new(after_full_cycle, after_full_cycle);
    config
}

fn three_candidates() -> HashMap<String, Vec<RawItem>> {
    HashMap::from([(
        "\"butuh jasa\"".to_string(),
        vec![
            fresh_item(9001, "butuh jasa desain logo"),
            fresh_item(9002, "cari jasa edit video"),
            fresh_item(9003, "butuh jasa bikin web"),
        ],
    )])
}

#[tokio::test(start_paused = true)]
async fn after_reply_pause_follows_only_successful_posts() {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let mut session = session(&journal, three_candidates(), Probe::NotEngaged, true);
    session.engagement = Box::new(PacedEngagement {
        journal: journal.clone(),
        opened: Instant::now(),
        outcomes: VecDeque::from([true, false, true]),
        interrupt_on_post: None,
    });

    let started = Instant::now();
    let summary = CycleScheduler::new(
        paced(0.0, 30.0, 0.0),
        rules(),
        template(),
        vec!["\"butuh jasa\"".into()],
        &mut store,
        Shutdown::never(),
    )
    .run(&mut session)
    .await;

    // 9001 posts, pause; 9002 fails, no pause; 9003 posts, pause.
    assert_eq!(journal.lock().unwrap().post_times, vec![0, 30, 30]);
    assert_eq!(started.elapsed().as_secs(), 60);
    assert_eq!(summary.cycles[0].posted, 2);
    assert_eq!(summary.cycles[0].post_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn between_queries_pause_follows_only_failed_searches() {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let results = HashMap::from([
        ("\"a\"".to_string(), Vec::new()),
        ("\"b\"".to_string(), Vec::new()),
    ]);
    let mut session = session(&journal, results, Probe::NotEngaged, true);

    let started = Instant::now();
    let summary = CycleScheduler::new(
        paced(100.0, 0.0, 0.0),
        rules(),
        template(),
        vec!["\"a\"".into(), "\"broken\"".into(), "\"b\"".into()],
        &mut store,
        Shutdown::never(),
    )
    .run(&mut session)
    .await;

    assert_eq!(summary.cycles[0].queries_failed, 1);
    // One back-off in total, whatever position the failing query was shuffled to.
    assert_eq!(started.elapsed().as_secs(), 100);

    let journal = journal.lock().unwrap();
    let broken_at = journal
        .searches
        .iter()
        .position(|q| q == "\"broken\"")
        .expect("broken query searched");
    for (index, at) in journal.search_times.iter().enumerate() {
        let expected = if index > broken_at { 100 } else { 0 };
        assert_eq!(*at, expected, "search {index} of {:?}", journal.searches);
    }
}

#[tokio::test(start_paused = true)]
async fn failed_last_query_still_backs_off() {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let mut session = session(&journal, HashMap::new(), Probe::NotEngaged, true);

    let started = Instant::now();
    let summary = CycleScheduler::new(
        paced(100.0, 0.0, 0.0),
        rules(),
        template(),
        vec!["\"broken\"".into()],
        &mut store,
        Shutdown::never(),
    )
    .run(&mut session)
    .await;

    assert_eq!(summary.cycles[0].queries_failed, 1);
    assert_eq!(started.elapsed().as_secs(), 100);
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_a_post_stops_before_the_next_candidate() {
    let dir = tempdir().expect("tempdir");
    let journal = SharedJournal::default();
    let mut store = DedupStore::open(dir.path().join("replied.txt"))
        .await
        .expect("store");
    let (trigger, shutdown) = shutdown_channel();
    let mut session = session(&journal, three_candidates(), Probe::NotEngaged, true);
    session.engagement = Box::new(PacedEngagement {
        journal: journal.clone(),
        opened: Instant::now(),
        outcomes: VecDeque::new(),
        interrupt_on_post: Some(trigger),
    });

    let mut config = paced(100.0, 30.0, 600.0);
    config.max_cycles = None;
    let started = Instant::now();
    let mut scheduler = CycleScheduler::new(
        config,
        rules(),
        template(),
        vec!["\"butuh jasa\"".into()],
        &mut store,
        shutdown,
    );
    let summary = scheduler.run(&mut session).await;
    assert_eq!(scheduler.state(), CycleState::Idle);
    drop(scheduler);

    assert!(summary.interrupted);
    assert_eq!(summary.cycles.len(), 1);
    assert_eq!(started.elapsed().as_secs(), 0);

    let journal = journal.lock().unwrap();
    assert_eq!(journal.probes, vec!["https://x.com/klien/status/9001".to_string()]);
    assert_eq!(journal.posts.len(), 1);
    assert!(store.contains("9001"));
    assert!(!store.contains("9002"));
}

struct ScriptedProvider {
    journal: SharedJournal,
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn open_authenticated_session(&self, _credentials: &Credentials) -> Result<Session, AdapterError> {
        Ok(session(&self.journal, single_query(), Probe::NotEngaged, true))
    }
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_cycle_pause_still_tears_down_the_session() {
    let dir = tempdir().expect("tempdir");
    let config: BotConfig = serde_json::from_value(serde_json::json!({
        "settings": { "max_tweet_age_days": 3 },
        "search_terms": ["butuh jasa"],
        "intent_keywords": ["butuh"],
        "service_keywords": ["jasa"],
        "reply_template": { "base": "Hai", "details": ["kak"], "cta_options": ["DM ya"] },
        "sleep_timers": {
            "between_queries_min": 0, "between_queries_max": 0,
            "after_reply_min": 0, "after_reply_max": 0,
            "after_full_cycle_min": 600, "after_full_cycle_max": 600,
            "scroll_settle_min": 0, "scroll_settle_max": 0
        }
    }))
    .expect("config");
    let runtime = RuntimeConfig {
        config_path: dir.path().join("config.json"),
        state_file: dir.path().join("replied.txt"),
        fixtures_dir: dir.path().join("fixtures"),
        artifacts_dir: dir.path().join("artifacts"),
        outbox: dir.path().join("outbox.jsonl"),
        reports_dir: dir.path().join("reports"),
        log_file: dir.path().join("replyscout.log"),
        base_url: "https://x.com".into(),
        max_cycles: None,
    };
    let credentials = Credentials {
        identity: "scoutbot".into(),
        secret: "secret".into(),
        recovery_contact: None,
    };
    let journal = SharedJournal::default();
    let provider = ScriptedProvider {
        journal: journal.clone(),
    };
    let diagnostics = Arc::new(RecordingDiagnostics {
        journal: journal.clone(),
    });

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        trigger.trigger();
    });

    let started = Instant::now();
    let summary = run_with_provider(&runtime, &config, &credentials, &provider, diagnostics, shutdown)
        .await
        .expect("run");

    assert!(summary.interrupted);
    assert_eq!(summary.cycles.len(), 1);
    assert_eq!(summary.total_posted(), 1);
    assert!(started.elapsed().as_secs() < 600);
    assert!(journal.lock().unwrap().closed);
    assert!(dir
        .path()
        .join("reports")
        .join(summary.run_id.to_string())
        .join("run_summary.json")
        .exists());
}
