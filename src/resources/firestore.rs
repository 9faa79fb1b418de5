//! A Firestore collection, backed by the `gcloud` and `firebase` command line tools.
//!
//! ## Configuration Format
//!
//! The options live in the `[benchmark]` table next to the benchmark's name:
//!
//! ```toml
//! [benchmark]
//! name = "cloud_firestore_ycsb"
//! project = "firestore-benchmark-tests" # project that hosts the Firestore database
//! keyfile = "serviceAccountKey.json"    # local path of the service account key
//! gcloud = "gcloud"                     # path of the gcloud utility
//! firebase_cli = "firebase"             # path of the firebase utility
//! delete_mode = "recursive"             # or "paginated" when firebase is not available
//! page_size = 10                        # documents fetched per page in paginated mode
//! max_fetches = 100000                  # upper bound of pages fetched in paginated mode
//! provision_key = false                 # create the service account and write `keyfile`
//! ```
//!
//! The collection itself is never created explicitly: Firestore creates it on the first write,
//! which is the load phase of the benchmark.

use crate::cmd::{CommandRunner, IssueOpt};
use crate::error::{Error, Result};
use crate::resources::{Change, Resource, ResourceIdentity};
use hashbrown::HashSet;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// A single recursive `firebase firestore:delete`.
    Recursive,
    /// Fetch-and-delete pages of documents until a fetch comes back empty.
    Paginated,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct FirestoreOpt {
    pub project: String,
    pub keyfile: String,
    pub debug: String,
    pub gcloud: String,
    pub firebase_cli: String,
    pub delete_mode: DeleteMode,
    pub page_size: usize,
    pub max_fetches: usize,
    pub provision_key: bool,
    pub list_args: Vec<String>,
}

impl Default for FirestoreOpt {
    fn default() -> Self {
        Self {
            project: "firestore-benchmark-tests".to_string(),
            keyfile: "serviceAccountKey.json".to_string(),
            debug: "false".to_string(),
            gcloud: "gcloud".to_string(),
            firebase_cli: "firebase".to_string(),
            delete_mode: DeleteMode::Recursive,
            page_size: 10,
            max_fetches: 100_000,
            provision_key: false,
            list_args: vec![
                "firestore".to_string(),
                "instances".to_string(),
                "list".to_string(),
            ],
        }
    }
}

impl FirestoreOpt {
    /// Parse the `[benchmark]` table; its `name` and `description` are not ours.
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let mut table = table.clone();
        table.remove("name");
        table.remove("description");
        table
            .try_into()
            .map_err(|e| Error::Configuration(format!("invalid firestore options: {}", e)))
    }

    pub fn sanity(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Configuration(msg.to_string()));
        if self.keyfile.is_empty() {
            return invalid("benchmark.keyfile should name the service account key");
        }
        if self.page_size == 0 {
            return invalid("benchmark.page_size should be positive");
        }
        if self.max_fetches == 0 {
            return invalid("benchmark.max_fetches should be positive");
        }
        Ok(())
    }
}

/// Page-wise access to the documents of a collection.
pub trait DocumentStore: Send + Sync {
    /// Resource names of at most `limit` documents still in `collection`.
    fn fetch(&self, collection: &str, limit: usize) -> Result<Vec<String>>;

    /// Delete one document by the resource name returned from `fetch`.
    fn delete(&self, document: &str) -> Result<()>;
}

/// Empty a collection page by page. Returns the number of deleted documents.
///
/// Every round fetches the first page of what is left, so the loop only ends on an empty fetch
/// and never guesses completion from the size of a page. A round with any failed deletion stops
/// the loop with [`Error::DeleteIncomplete`], as does reaching `max_fetches`.
pub fn delete_paginated(
    store: &dyn DocumentStore,
    collection: &str,
    page_size: usize,
    max_fetches: usize,
) -> Result<usize> {
    if page_size == 0 {
        return Err(Error::Configuration(
            "page size should be positive".to_string(),
        ));
    }
    let mut deleted = 0usize;
    for _ in 0..max_fetches {
        let page = store.fetch(collection, page_size)?;
        if page.is_empty() {
            info!("Deleted {} document(s) from {}", deleted, collection);
            return Ok(deleted);
        }
        debug!("Deleting a page of {} document(s) from {}", page.len(), collection);
        let mut failures = Vec::new();
        for document in page.iter() {
            match store.delete(document) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    error!("Failed to delete {}: {}", document, e);
                    failures.push(format!("{}: {}", document, e));
                }
            }
        }
        if !failures.is_empty() {
            return Err(Error::DeleteIncomplete {
                collection: collection.to_string(),
                deleted,
                reason: failures.join("; "),
            });
        }
    }
    Err(Error::DeleteIncomplete {
        collection: collection.to_string(),
        deleted,
        reason: format!("still not empty after {} fetches", max_fetches),
    })
}

#[derive(Deserialize)]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<NamedEntry>,
}

#[derive(Deserialize)]
struct NamedEntry {
    name: String,
}

/// Documents over the Firestore REST API, through `curl` and a `gcloud` access token.
pub struct RestDocumentStore {
    project: String,
    gcloud: String,
    runner: CommandRunner,
    token: Mutex<Option<String>>,
}

impl RestDocumentStore {
    pub fn new(opt: &FirestoreOpt, runner: CommandRunner) -> Self {
        Self {
            project: opt.project.clone(),
            gcloud: opt.gcloud.clone(),
            runner,
            token: Mutex::new(None),
        }
    }

    fn forget_token(&self) {
        *self.token.lock() = None;
    }

    fn token(&self) -> Result<String> {
        let mut token = self.token.lock();
        if let Some(t) = token.as_ref() {
            return Ok(t.clone());
        }
        let out = self.runner.issue(
            &[self.gcloud.as_str(), "auth", "print-access-token"],
            IssueOpt::retryable(),
        )?;
        let t = out.stdout.trim().to_string();
        *token = Some(t.clone());
        Ok(t)
    }

    fn request(&self, method: &str, url: &str) -> Result<String> {
        let header = format!("Authorization: Bearer {}", self.token()?);
        let out = self.runner.issue(
            &["curl", "-sS", "--fail", "-X", method, "-H", &header, url],
            IssueOpt::retryable(),
        )?;
        Ok(out.stdout)
    }

    /// Access tokens expire after about an hour, so a rejected token is fetched again once.
    fn curl(&self, method: &str, url: &str) -> Result<String> {
        match self.request(method, url) {
            Err(e) if rejects_token(&e) => {
                warn!("Access token rejected, fetching a new one");
                self.forget_token();
                self.request(method, url)
            }
            r => r,
        }
    }
}

/// `curl --fail` reports HTTP errors as `The requested URL returned error: <status>`.
fn rejects_token(e: &Error) -> bool {
    e.stderr()
        .is_some_and(|s| s.contains("error: 401") || s.contains("error: 403"))
}

impl DocumentStore for RestDocumentStore {
    fn fetch(&self, collection: &str, limit: usize) -> Result<Vec<String>> {
        let url = format!(
            "{}/projects/{}/databases/(default)/documents/{}?pageSize={}&mask.fieldPaths=__name__",
            FIRESTORE_API, self.project, collection, limit
        );
        let body = self.curl("GET", &url)?;
        let response: ListDocumentsResponse = serde_json::from_str(&body)?;
        Ok(response.documents.into_iter().map(|d| d.name).collect())
    }

    fn delete(&self, document: &str) -> Result<()> {
        let url = format!("{}/{}", FIRESTORE_API, document);
        self.curl("DELETE", &url).map(|_| ())
    }
}

pub struct FirestoreCollection {
    identity: ResourceIdentity,
    opt: FirestoreOpt,
    runner: CommandRunner,
    documents: Box<dyn DocumentStore>,
}

impl FirestoreCollection {
    pub fn new(identity: ResourceIdentity, opt: &FirestoreOpt, runner: CommandRunner) -> Self {
        let documents = Box::new(RestDocumentStore::new(opt, runner.clone()));
        Self::with_document_store(identity, opt, runner, documents)
    }

    pub fn with_document_store(
        identity: ResourceIdentity,
        opt: &FirestoreOpt,
        runner: CommandRunner,
        documents: Box<dyn DocumentStore>,
    ) -> Self {
        Self {
            identity,
            opt: opt.clone(),
            runner,
            documents,
        }
    }

    /// The email of the service account provisioned for this collection.
    pub fn service_account(&self) -> String {
        format!(
            "{}@{}.iam.gserviceaccount.com",
            self.identity.name(),
            self.identity.project()
        )
    }

    fn create_service_account(&self) -> Result<Change> {
        let created = self.runner.issue(
            &[
                self.opt.gcloud.as_str(),
                "iam",
                "service-accounts",
                "create",
                self.identity.name(),
                "--project",
                self.identity.project(),
            ],
            IssueOpt::default(),
        );
        let change = match created {
            Ok(_) => Change::Applied,
            Err(e) if e.is_conflict() => Change::Unchanged,
            Err(e) => return Err(e),
        };
        let account = self.service_account();
        self.runner.issue(
            &[
                self.opt.gcloud.as_str(),
                "iam",
                "service-accounts",
                "keys",
                "create",
                self.opt.keyfile.as_str(),
                "--iam-account",
                account.as_str(),
                "--project",
                self.identity.project(),
            ],
            IssueOpt::retryable(),
        )?;
        Ok(change)
    }

    fn delete_service_account(&self) -> Result<()> {
        let account = self.service_account();
        let deleted = self.runner.issue(
            &[
                self.opt.gcloud.as_str(),
                "iam",
                "service-accounts",
                "delete",
                account.as_str(),
                "--project",
                self.identity.project(),
                "--quiet",
            ],
            IssueOpt::retryable(),
        );
        match deleted {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    fn delete_collection(&self) -> Result<Change> {
        match self.opt.delete_mode {
            DeleteMode::Recursive => {
                let deleted = self.runner.issue(
                    &[
                        self.opt.firebase_cli.as_str(),
                        "firestore:delete",
                        self.identity.name(),
                        "--project",
                        self.identity.project(),
                        "-r",
                        "-y",
                    ],
                    IssueOpt::retryable(),
                );
                match deleted {
                    Ok(_) => Ok(Change::Applied),
                    Err(e) if e.is_not_found() => Ok(Change::Unchanged),
                    Err(e) => Err(e),
                }
            }
            DeleteMode::Paginated => {
                let n = delete_paginated(
                    self.documents.as_ref(),
                    self.identity.name(),
                    self.opt.page_size,
                    self.opt.max_fetches,
                )?;
                match n {
                    0 => Ok(Change::Unchanged),
                    _ => Ok(Change::Applied),
                }
            }
        }
    }
}

impl Resource for FirestoreCollection {
    fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    fn create(&self) -> Result<Change> {
        if self.opt.provision_key {
            return self.create_service_account();
        }
        Ok(Change::Applied)
    }

    fn delete(&self) -> Result<Change> {
        let change = self.delete_collection()?;
        if self.opt.provision_key {
            self.delete_service_account()?;
        }
        Ok(change)
    }

    fn exists(&self) -> Result<bool> {
        let mut argv = vec![self.opt.gcloud.clone()];
        argv.extend(self.opt.list_args.iter().cloned());
        argv.extend([
            "--project".to_string(),
            self.identity.project().to_string(),
            "--format=json".to_string(),
        ]);
        let ambiguous = |reason: String| Error::AmbiguousState {
            name: self.identity.full_name(),
            reason,
        };
        let out = self
            .runner
            .issue(&argv, IssueOpt::quiet())
            .map_err(|e| ambiguous(e.to_string()))?;
        let listed: Vec<NamedEntry> =
            serde_json::from_str(&out.stdout).map_err(|e| ambiguous(e.to_string()))?;
        let names: HashSet<String> = listed.into_iter().map(|e| e.name).collect();
        Ok(names.contains(&self.identity.full_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RetryOpt;
    use crate::resources::{ManagedResource, ResourceState};
    use crate::testing::{fail, ok, FakeSpawn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A collection of `n` documents that counts its calls.
    struct FakeDocuments {
        left: Mutex<Vec<String>>,
        fetches: AtomicUsize,
        fail_on: Option<String>,
    }

    impl FakeDocuments {
        fn new(n: usize) -> Self {
            Self {
                left: Mutex::new((0..n).map(|i| format!("doc{}", i)).collect()),
                fetches: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    impl DocumentStore for FakeDocuments {
        fn fetch(&self, _collection: &str, limit: usize) -> Result<Vec<String>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.left.lock().iter().take(limit).cloned().collect())
        }

        fn delete(&self, document: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some(document) {
                return Err(Error::Configuration("permission denied".to_string()));
            }
            self.left.lock().retain(|d| d != document);
            Ok(())
        }
    }

    impl DocumentStore for Arc<FakeDocuments> {
        fn fetch(&self, collection: &str, limit: usize) -> Result<Vec<String>> {
            self.as_ref().fetch(collection, limit)
        }

        fn delete(&self, document: &str) -> Result<()> {
            self.as_ref().delete(document)
        }
    }

    fn runner(spawn: &Arc<FakeSpawn>) -> CommandRunner {
        let retry = RetryOpt {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        CommandRunner::new(spawn.clone(), retry)
    }

    fn collection(spawn: &Arc<FakeSpawn>, opt: &FirestoreOpt) -> FirestoreCollection {
        let id = ResourceIdentity::for_run("abc123", &opt.project, "us-central1-a");
        FirestoreCollection::new(id, opt, runner(spawn))
    }

    fn paginated(n: usize, page: usize) -> (usize, usize) {
        let docs = FakeDocuments::new(n);
        let deleted = delete_paginated(&docs, "pkb-abc123", page, 1000).unwrap();
        assert!(docs.left.lock().is_empty());
        (deleted, docs.fetches.load(Ordering::SeqCst))
    }

    #[test]
    fn paginated_delete_exhausts_collection() {
        // ceil(N/P) non-empty fetches, then one empty fetch
        assert_eq!(paginated(25, 10), (25, 4));
        assert_eq!(paginated(20, 10), (20, 3));
        assert_eq!(paginated(10, 10), (10, 2));
        assert_eq!(paginated(3, 10), (3, 2));
        assert_eq!(paginated(0, 10), (0, 1));
    }

    #[test]
    fn paginated_delete_reports_failures() {
        let mut docs = FakeDocuments::new(15);
        docs.fail_on = Some("doc12".to_string());
        let err = delete_paginated(&docs, "pkb-abc123", 10, 1000).unwrap_err();
        match err {
            Error::DeleteIncomplete {
                deleted, reason, ..
            } => {
                assert_eq!(deleted, 14);
                assert!(reason.contains("doc12"));
            }
            e => panic!("unexpected error {:?}", e),
        }
        assert_eq!(docs.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn paginated_delete_is_bounded() {
        let docs = FakeDocuments::new(100);
        let err = delete_paginated(&docs, "pkb-abc123", 10, 3).unwrap_err();
        assert!(matches!(err, Error::DeleteIncomplete { deleted: 30, .. }));
    }

    #[test]
    fn recursive_delete_command() {
        let spawn = FakeSpawn::new(|_| ok(""));
        let opt = FirestoreOpt {
            project: "proj".to_string(),
            ..Default::default()
        };
        assert_eq!(collection(&spawn, &opt).delete().unwrap(), Change::Applied);
        assert_eq!(
            spawn.calls(),
            vec![vec![
                "firebase",
                "firestore:delete",
                "pkb-abc123",
                "--project",
                "proj",
                "-r",
                "-y"
            ]]
        );
    }

    #[test]
    fn recursive_delete_tolerates_missing_collection() {
        let spawn = FakeSpawn::new(|_| fail(1, "Error: NOT_FOUND"));
        let c = collection(&spawn, &FirestoreOpt::default());
        assert_eq!(c.delete().unwrap(), Change::Unchanged);
        assert_eq!(spawn.calls().len(), 1);
    }

    #[test]
    fn recursive_delete_surfaces_other_failures() {
        let spawn = FakeSpawn::new(|_| fail(1, "Error: PERMISSION_DENIED"));
        let c = collection(&spawn, &FirestoreOpt::default());
        let err = c.delete().unwrap_err();
        assert_eq!(err.stderr(), Some("Error: PERMISSION_DENIED"));
        // retried up to the ceiling
        assert_eq!(spawn.calls().len(), 3);
    }

    #[test]
    fn paginated_delete_through_resource() {
        let spawn = FakeSpawn::new(|_| ok(""));
        let opt = FirestoreOpt {
            delete_mode: DeleteMode::Paginated,
            page_size: 4,
            ..Default::default()
        };
        let docs = Arc::new(FakeDocuments::new(9));
        let id = ResourceIdentity::for_run("abc123", &opt.project, "");
        let c = FirestoreCollection::with_document_store(
            id,
            &opt,
            runner(&spawn),
            Box::new(docs.clone()),
        );
        assert_eq!(c.delete().unwrap(), Change::Applied);
        assert_eq!(docs.fetches.load(Ordering::SeqCst), 4);
        assert_eq!(c.delete().unwrap(), Change::Unchanged);
        assert!(spawn.calls().is_empty());
    }

    #[test]
    fn rest_document_store_parses_pages() {
        let spawn = FakeSpawn::new(|argv| {
            if argv[0] == "gcloud" {
                return ok("ya29.token\n");
            }
            match argv[4].as_str() {
                "GET" => ok(r#"{"documents": [
                    {"name": "projects/p/databases/(default)/documents/pkb-x/user1"},
                    {"name": "projects/p/databases/(default)/documents/pkb-x/user2"}
                ]}"#),
                _ => ok("{}"),
            }
        });
        let opt = FirestoreOpt {
            project: "p".to_string(),
            ..Default::default()
        };
        let store = RestDocumentStore::new(&opt, runner(&spawn));
        let page = store.fetch("pkb-x", 2).unwrap();
        assert_eq!(
            page,
            vec![
                "projects/p/databases/(default)/documents/pkb-x/user1",
                "projects/p/databases/(default)/documents/pkb-x/user2"
            ]
        );
        store.delete(&page[0]).unwrap();
        let calls = spawn.calls();
        // the token is fetched once
        assert_eq!(calls.iter().filter(|c| c[0] == "gcloud").count(), 1);
        assert_eq!(calls[1][6], "Authorization: Bearer ya29.token");
        assert!(calls[1][7].ends_with("documents/pkb-x?pageSize=2&mask.fieldPaths=__name__"));
        assert_eq!(
            calls[2][7],
            "https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents/pkb-x/user1"
        );
    }

    #[test]
    fn empty_page_has_no_documents_field() {
        let spawn = FakeSpawn::new(|argv| match argv[0].as_str() {
            "gcloud" => ok("t"),
            _ => ok("{}"),
        });
        let store = RestDocumentStore::new(&FirestoreOpt::default(), runner(&spawn));
        assert!(store.fetch("pkb-x", 10).unwrap().is_empty());
    }

    #[test]
    fn exists_checks_listing() {
        let listed = r#"[
            {"name": "projects/proj/instances/pkb-other"},
            {"name": "projects/proj/instances/pkb-abc123"}
        ]"#;
        let spawn = FakeSpawn::new(move |_| ok(listed));
        let opt = FirestoreOpt {
            project: "proj".to_string(),
            ..Default::default()
        };
        assert!(collection(&spawn, &opt).exists().unwrap());
        assert_eq!(
            spawn.calls()[0],
            vec![
                "gcloud",
                "firestore",
                "instances",
                "list",
                "--project",
                "proj",
                "--format=json"
            ]
        );
    }

    #[test]
    fn exists_after_delete_is_false() {
        let spawn = FakeSpawn::new(|argv| match argv[0].as_str() {
            "gcloud" => ok(r#"[{"name": "projects/proj/instances/pkb-other"}]"#),
            _ => ok(""),
        });
        let opt = FirestoreOpt {
            project: "proj".to_string(),
            ..Default::default()
        };
        let id = ResourceIdentity::for_run("abc123", "proj", "");
        let r = ManagedResource::existing(Box::new(FirestoreCollection::new(
            id,
            &opt,
            runner(&spawn),
        )));
        r.delete().unwrap();
        assert_eq!(r.state(), ResourceState::Absent);
        assert!(!r.exists());
    }

    #[test]
    fn exists_failure_is_ambiguous() {
        let spawn = FakeSpawn::new(|_| fail(1, "ERROR: network unreachable"));
        let c = collection(&spawn, &FirestoreOpt::default());
        assert!(matches!(c.exists(), Err(Error::AmbiguousState { .. })));
        let spawn = FakeSpawn::new(|_| ok("not json"));
        let c = collection(&spawn, &FirestoreOpt::default());
        assert!(matches!(c.exists(), Err(Error::AmbiguousState { .. })));
    }

    #[test]
    fn create_provisions_key() {
        let spawn = FakeSpawn::new(|_| ok(""));
        let opt = FirestoreOpt {
            project: "proj".to_string(),
            keyfile: "/tmp/key.json".to_string(),
            provision_key: true,
            ..Default::default()
        };
        let c = collection(&spawn, &opt);
        assert_eq!(c.create().unwrap(), Change::Applied);
        let calls = spawn.calls();
        assert_eq!(
            calls[0],
            vec!["gcloud", "iam", "service-accounts", "create", "pkb-abc123", "--project", "proj"]
        );
        assert_eq!(
            calls[1],
            vec![
                "gcloud",
                "iam",
                "service-accounts",
                "keys",
                "create",
                "/tmp/key.json",
                "--iam-account",
                "pkb-abc123@proj.iam.gserviceaccount.com",
                "--project",
                "proj"
            ]
        );
    }

    #[test]
    fn create_tolerates_existing_account() {
        let spawn = FakeSpawn::new(|argv| match argv[3].as_str() {
            "create" => fail(1, "ERROR: (gcloud.iam.service-accounts.create) already exists"),
            _ => ok(""),
        });
        let opt = FirestoreOpt {
            provision_key: true,
            ..Default::default()
        };
        let c = collection(&spawn, &opt);
        assert_eq!(c.create().unwrap(), Change::Unchanged);
        // not retried, key still written
        assert_eq!(spawn.calls().len(), 2);
    }

    #[test]
    fn create_without_key_is_local() {
        let spawn = FakeSpawn::new(|_| ok(""));
        let c = collection(&spawn, &FirestoreOpt::default());
        assert_eq!(c.create().unwrap(), Change::Applied);
        assert!(spawn.calls().is_empty());
    }

    #[test]
    fn delete_removes_provisioned_account() {
        let spawn = FakeSpawn::new(|argv| match argv[0].as_str() {
            "gcloud" => fail(1, "NOT_FOUND: account"),
            _ => ok(""),
        });
        let opt = FirestoreOpt {
            provision_key: true,
            ..Default::default()
        };
        let c = collection(&spawn, &opt);
        assert_eq!(c.delete().unwrap(), Change::Applied);
        let calls = spawn.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1][3], "delete");
    }

    #[test]
    fn options_from_table() {
        let table: toml::Table = toml::from_str(
            r#"
            name = "cloud_firestore_ycsb"
            project = "p"
            delete_mode = "paginated"
            page_size = 25
            "#,
        )
        .unwrap();
        let opt = FirestoreOpt::from_table(&table).unwrap();
        assert_eq!(opt.project, "p");
        assert_eq!(opt.delete_mode, DeleteMode::Paginated);
        assert_eq!(opt.page_size, 25);
        assert_eq!(opt.keyfile, "serviceAccountKey.json");
        let table: toml::Table = toml::from_str(r#"delete_mode = "manual""#).unwrap();
        assert!(FirestoreOpt::from_table(&table).is_err());
    }

    #[test]
    fn unknown_and_invalid_options() {
        let table: toml::Table = toml::from_str("page_sise = 5").unwrap();
        assert!(matches!(
            FirestoreOpt::from_table(&table),
            Err(Error::Configuration(_))
        ));
        FirestoreOpt::default().sanity().unwrap();
        for opt in [
            FirestoreOpt {
                page_size: 0,
                ..Default::default()
            },
            FirestoreOpt {
                max_fetches: 0,
                ..Default::default()
            },
            FirestoreOpt {
                keyfile: String::new(),
                ..Default::default()
            },
        ] {
            assert!(matches!(opt.sanity(), Err(Error::Configuration(_))));
        }
    }

    #[test]
    fn zero_page_size_is_an_error_not_a_panic() {
        let docs = FakeDocuments::new(3);
        assert!(matches!(
            delete_paginated(&docs, "pkb-abc123", 0, 10),
            Err(Error::Configuration(_))
        ));
        assert_eq!(docs.left.lock().len(), 3);

        let spawn = FakeSpawn::new(|_| ok(""));
        let opt = FirestoreOpt {
            delete_mode: DeleteMode::Paginated,
            page_size: 0,
            ..Default::default()
        };
        let id = ResourceIdentity::for_run("abc123", &opt.project, "us-central1-a");
        let resource = ManagedResource::existing(Box::new(FirestoreCollection::with_document_store(
            id,
            &opt,
            runner(&spawn),
            Box::new(FakeDocuments::new(3)),
        )));
        assert!(matches!(resource.delete(), Err(Error::Configuration(_))));
    }

    #[test]
    fn expired_token_is_fetched_again() {
        let tokens = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let (t, r) = (tokens.clone(), requests.clone());
        let spawn = FakeSpawn::new(move |argv| {
            if argv[0] == "gcloud" {
                let n = t.fetch_add(1, Ordering::SeqCst) + 1;
                return ok(&format!("token{}\n", n));
            }
            // the first token expires after two requests
            let n = r.fetch_add(1, Ordering::SeqCst);
            if argv[6] == "Authorization: Bearer token1" && n >= 2 {
                return fail(22, "curl: (22) The requested URL returned error: 401");
            }
            ok("{}")
        });
        let store = RestDocumentStore::new(&FirestoreOpt::default(), runner(&spawn));
        for i in 0..5 {
            store.delete(&format!("doc{}", i)).unwrap();
        }
        assert_eq!(tokens.load(Ordering::SeqCst), 2);
        let calls = spawn.calls();
        let last = calls.last().unwrap();
        assert_eq!(last[6], "Authorization: Bearer token2");
        assert!(last[7].ends_with("doc4"));
    }

    #[test]
    fn forbidden_twice_is_surfaced() {
        let spawn = FakeSpawn::new(|argv| match argv[0].as_str() {
            "gcloud" => ok("t"),
            _ => fail(22, "curl: (22) The requested URL returned error: 403"),
        });
        let store = RestDocumentStore::new(&FirestoreOpt::default(), runner(&spawn));
        let err = store.delete("doc").unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: 22, .. }));
        // one fresh token, then no further refresh
        let calls = spawn.calls();
        assert_eq!(calls.iter().filter(|c| c[0] == "gcloud").count(), 2);
    }
}
