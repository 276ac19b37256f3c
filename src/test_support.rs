//! Shared fixtures for unit tests

use crate::{
    approval::ApprovalStorage,
    config::JobConfig,
    content::{ContentStorage, ContentType, Instance, NewContentType, NewInstance},
    database::Database,
    flow::{Flow, FlowStorage, NewFlow, State},
    membership::MembershipStorage,
    organisation::{NewOrganisation, NewUser, Organisation, OrganisationStorage, User},
    runtime::jobs::JobQueue,
};
use serde_json::json;

/// An organisation with two users and one seeded flow
pub(crate) struct Fixture {
    pub db: Database,
    pub jobs: JobQueue,
    pub organisations: OrganisationStorage,
    pub flows: FlowStorage,
    pub content: ContentStorage,
    pub approvals: ApprovalStorage,
    pub memberships: MembershipStorage,
    pub org: Organisation,
    pub user: User,
    pub approver: User,
    pub flow: Flow,
    pub states: Vec<State>,
}

impl Fixture {
    pub async fn new(controlled: bool) -> Self {
        let db = Database::in_memory().await.unwrap();
        let jobs = JobQueue::new(&db, &test_job_config());
        let organisations = OrganisationStorage::new(&db);
        let flows = FlowStorage::new(&db, jobs.clone());

        let org = organisations
            .create_organisation(NewOrganisation { name: "Acme".into(), email: None })
            .await
            .unwrap();
        let user = organisations
            .create_user(NewUser {
                name: "Writer".into(),
                email: "writer@acme.test".into(),
                organisation_id: org.id.clone(),
            })
            .await
            .unwrap();
        let approver = organisations
            .create_user(NewUser {
                name: "Approver".into(),
                email: "approver@acme.test".into(),
                organisation_id: org.id.clone(),
            })
            .await
            .unwrap();

        let flow = flows
            .create_flow(&org.id, NewFlow { name: "Main".into(), controlled })
            .await
            .unwrap();
        let states = flows.seed_default_states(&flow.id).await.unwrap();

        Self {
            content: ContentStorage::new(&db),
            approvals: ApprovalStorage::new(&db),
            memberships: MembershipStorage::new(&db, jobs.clone()),
            db,
            jobs,
            organisations,
            flows,
            org,
            user,
            approver,
            flow,
            states,
        }
    }

    pub async fn content_type(&self, name: &str, prefix: &str) -> ContentType {
        self.content
            .create_content_type(&self.org.id, NewContentType {
                name: name.into(),
                prefix: prefix.into(),
                flow_id: self.flow.id.clone(),
            })
            .await
            .unwrap()
    }

    pub async fn instance(&self, content_type_id: &str) -> Instance {
        self.content
            .create_instance(content_type_id, &self.user.id, NewInstance { serialized: json!({ "title": "Test" }) })
            .await
            .unwrap()
    }

    /// Another controlled flow of the same organisation, already seeded
    pub async fn seeded_flow(&self, name: &str) -> Vec<State> {
        let flow = self
            .flows
            .create_flow(&self.org.id, NewFlow { name: name.into(), controlled: true })
            .await
            .unwrap();
        self.flows.seed_default_states(&flow.id).await.unwrap()
    }

    pub async fn user_in_new_organisation(&self, email: &str) -> User {
        let org = self
            .organisations
            .create_organisation(NewOrganisation { name: "Other".into(), email: None })
            .await
            .unwrap();
        self.organisations
            .create_user(NewUser { name: "Other".into(), email: email.into(), organisation_id: org.id })
            .await
            .unwrap()
    }
}

pub(crate) fn test_job_config() -> JobConfig {
    JobConfig {
        schedule: "*/5 * * * * *".into(),
        batch_size: 10,
        max_attempts: 3,
        backoff_secs: 30,
        lease_secs: 300,
    }
}
