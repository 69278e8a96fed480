//! End-to-end login lifecycle over the public API.
//!
//! The directory itself is stubbed behind the `UserAuthenticator` seam;
//! these tests cover the lifecycle guarantees a hosting framework relies
//! on: staging before commit, exact rollback, and failure collapsing.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use directory_login::{
    CredentialError, CredentialSource, DirectoryError, DirectoryResult, LoginError, LoginState,
    LoginTransaction, Principal, SharedSubject, StaticCredentials, Subject, UserAuthenticator,
};

/// In-memory directory with a single account table.
struct FixtureDirectory {
    accounts: Vec<(&'static str, &'static str, Vec<Principal>)>,
}

impl FixtureDirectory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            accounts: vec![
                (
                    "jdoe",
                    "hunter2",
                    vec![
                        Principal::user("jdoe"),
                        Principal::group("Sales"),
                        Principal::group("Ops"),
                    ],
                ),
                ("msmith", "letmein", vec![Principal::user("msmith")]),
            ],
        })
    }
}

#[async_trait]
impl UserAuthenticator for FixtureDirectory {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> DirectoryResult<HashSet<Principal>> {
        if password.is_empty() {
            return Err(DirectoryError::InvalidCredentials);
        }
        let account = self
            .accounts
            .iter()
            .find(|(name, _, _)| *name == username)
            .ok_or_else(|| DirectoryError::user_not_found(username))?;
        if account.1 != password {
            return Err(DirectoryError::InvalidCredentials);
        }
        Ok(account.2.iter().cloned().collect())
    }
}

fn subject() -> SharedSubject {
    Arc::new(Mutex::new(Subject::new()))
}

fn login(
    subject: &SharedSubject,
    directory: &Arc<FixtureDirectory>,
    username: &str,
    password: &str,
) -> LoginTransaction {
    LoginTransaction::new(
        Arc::clone(subject),
        Box::new(StaticCredentials::new(username, password)),
        Arc::clone(directory) as Arc<dyn UserAuthenticator>,
    )
}

#[tokio::test]
async fn full_lifecycle_attaches_and_detaches_principals() {
    let directory = FixtureDirectory::new();
    let subject = subject();

    let mut txn = login(&subject, &directory, "jdoe", "hunter2");
    txn.authenticate().await.unwrap();
    assert!(subject.lock().principals().is_empty());

    txn.commit().unwrap();
    {
        let guard = subject.lock();
        assert_eq!(guard.principals().len(), 3);
        assert!(guard.contains(&Principal::user("jdoe")));
        assert!(guard.contains(&Principal::group("Sales")));
        assert!(guard.contains(&Principal::group("Ops")));
    }

    txn.abort();
    assert!(subject.lock().principals().is_empty());
}

#[tokio::test]
async fn rollback_preserves_principals_from_other_providers() {
    let directory = FixtureDirectory::new();
    let subject = subject();
    subject.lock().attach(Principal::group("FromAnotherProvider"));

    let mut txn = login(&subject, &directory, "jdoe", "hunter2");
    txn.authenticate().await.unwrap();
    txn.commit().unwrap();
    assert_eq!(subject.lock().principals().len(), 4);

    txn.abort();
    let guard = subject.lock();
    assert_eq!(guard.principals().len(), 1);
    assert!(guard.contains(&Principal::group("FromAnotherProvider")));
}

#[tokio::test]
async fn wrong_password_and_unknown_user_look_identical() {
    let directory = FixtureDirectory::new();

    let subject_a = subject();
    let mut wrong_password = login(&subject_a, &directory, "jdoe", "not-the-password");
    let err_a = wrong_password.authenticate().await.unwrap_err();

    let subject_b = subject();
    let mut unknown_user = login(&subject_b, &directory, "nobody", "hunter2");
    let err_b = unknown_user.authenticate().await.unwrap_err();

    assert_eq!(err_a.to_string(), err_b.to_string());
    assert!(matches!(err_a, LoginError::AuthenticationFailed));
    assert!(matches!(err_b, LoginError::AuthenticationFailed));

    // Operators can still tell them apart through the diagnostic record.
    assert!(matches!(
        wrong_password.diagnostic(),
        Some(DirectoryError::InvalidCredentials)
    ));
    assert!(matches!(
        unknown_user.diagnostic(),
        Some(DirectoryError::UserNotFound(_))
    ));
}

#[tokio::test]
async fn failed_login_never_mutates_the_subject() {
    let directory = FixtureDirectory::new();
    let subject = subject();
    subject.lock().attach(Principal::group("PreExisting"));

    let mut txn = login(&subject, &directory, "jdoe", "wrong");
    let _ = txn.authenticate().await;
    assert_eq!(txn.state(), LoginState::Failed);
    assert!(txn.commit().is_err());

    txn.abort();
    let guard = subject.lock();
    assert_eq!(guard.principals().len(), 1);
    assert!(guard.contains(&Principal::group("PreExisting")));
}

#[tokio::test]
async fn two_providers_can_stack_principals_on_one_subject() {
    let directory = FixtureDirectory::new();
    let subject = subject();

    let mut first = login(&subject, &directory, "jdoe", "hunter2");
    first.authenticate().await.unwrap();
    first.commit().unwrap();

    let mut second = login(&subject, &directory, "msmith", "letmein");
    second.authenticate().await.unwrap();
    second.commit().unwrap();

    assert_eq!(subject.lock().principals().len(), 4);

    // Aborting the first attempt leaves the second attempt's principals.
    first.abort();
    let guard = subject.lock();
    assert_eq!(guard.principals().len(), 1);
    assert!(guard.contains(&Principal::user("msmith")));
}

#[tokio::test]
async fn credentials_cannot_be_replayed_across_transactions() {
    struct ConsumedSource(StaticCredentials);
    impl CredentialSource for ConsumedSource {
        fn take_username(&mut self) -> Result<String, CredentialError> {
            self.0.take_username()
        }
        fn take_password(&mut self) -> Result<String, CredentialError> {
            self.0.take_password()
        }
    }

    let mut source = ConsumedSource(StaticCredentials::new("jdoe", "hunter2"));
    // First pull drains the source.
    source.take_username().unwrap();
    source.take_password().unwrap();

    let subject = subject();
    let mut txn = LoginTransaction::new(
        Arc::clone(&subject),
        Box::new(source),
        FixtureDirectory::new() as Arc<dyn UserAuthenticator>,
    );

    let err = txn.authenticate().await.unwrap_err();
    assert!(matches!(err, LoginError::CredentialsUnavailable(_)));
    assert_eq!(txn.state(), LoginState::Initialized);
}
