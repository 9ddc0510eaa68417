//! Repository tests for the versioned entities, run against in-memory SQLite.

use crate::context::Context;
use crate::entities::domain::*;
use crate::entities::repository::*;
use crate::ids::{ProjectId, TenantId};
use crate::storage::SqliteStore;

fn open_store() -> (SqliteStore, Context) {
    let store = SqliteStore::in_memory().expect("in-memory store");
    (store, Context::new(TenantId::new()))
}

fn roadmap(title: &str) -> RoadmapFields {
    RoadmapFields {
        title: title.to_string(),
        description: String::new(),
        status: RoadmapStatus::Draft,
    }
}

mod projects {
    use super::*;

    #[tokio::test]
    async fn create_get_and_list() {
        let (store, cx) = open_store();
        let a = store
            .create_project(&cx, ProjectFields::named("alpha"))
            .await
            .unwrap();
        let b = store
            .create_project(&cx, ProjectFields::named("beta"))
            .await
            .unwrap();
        assert_eq!(a.version, 1);

        let fetched = store.get_project(&cx, a.id).await.unwrap();
        assert_eq!(fetched.name, "alpha");
        assert_eq!(fetched.tenant_id, cx.tenant());

        let names: Vec<_> = store
            .list_projects(&cx)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(names, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn update_bumps_version_and_rejects_stale_writers() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("alpha"))
            .await
            .unwrap();

        let mut fields = ProjectFields::named("alpha-2");
        fields.repo_url = Some("https://git.example.com/alpha".into());
        let updated = store
            .update_project(&cx, project.id, fields.clone(), 1)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.repo_url.as_deref(), Some("https://git.example.com/alpha"));

        let err = store
            .update_project(&cx, project.id, ProjectFields::named("lost"), 1)
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "got {err:?}");
        assert_eq!(store.get_project(&cx, project.id).await.unwrap().name, "alpha-2");
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let (store, cx) = open_store();
        let err = store
            .create_project(&cx, ProjectFields::named("  "))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn other_tenants_see_not_found() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("private"))
            .await
            .unwrap();

        let intruder = Context::new(TenantId::new());
        assert!(store.get_project(&intruder, project.id).await.unwrap_err().is_not_found());
        let err = store
            .update_project(&intruder, project.id, ProjectFields::named("x"), 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.list_projects(&intruder).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("doomed"))
            .await
            .unwrap();
        let rm = store
            .create_roadmap(&cx, project.id, roadmap("q3"))
            .await
            .unwrap();

        let err = store.delete_project(&cx, project.id, 7).await.unwrap_err();
        assert!(err.is_conflict());

        store.delete_project(&cx, project.id, 1).await.unwrap();
        assert!(store.get_roadmap(&cx, rm.id).await.unwrap_err().is_not_found());
        assert!(store.delete_project(&cx, project.id, 1).await.unwrap_err().is_not_found());
    }
}

mod hierarchy {
    use super::*;

    #[tokio::test]
    async fn roadmap_requires_owned_project() {
        let (store, cx) = open_store();
        let err = store
            .create_roadmap(&cx, ProjectId::new(), roadmap("orphan"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn milestones_and_features_order_by_sort_order() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("p"))
            .await
            .unwrap();
        let rm = store
            .create_roadmap(&cx, project.id, roadmap("h2"))
            .await
            .unwrap();

        let late = store
            .create_milestone(
                &cx,
                rm.id,
                MilestoneFields {
                    title: "beta".into(),
                    description: String::new(),
                    status: MilestoneStatus::Open,
                    sort_order: 2,
                },
            )
            .await
            .unwrap();
        let early = store
            .create_milestone(
                &cx,
                rm.id,
                MilestoneFields {
                    title: "alpha".into(),
                    description: String::new(),
                    status: MilestoneStatus::Open,
                    sort_order: 1,
                },
            )
            .await
            .unwrap();
        let order: Vec<_> = store
            .list_milestones(&cx, rm.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(order, vec![early.id, late.id]);

        let feature = store
            .create_feature(
                &cx,
                early.id,
                FeatureFields {
                    title: "login".into(),
                    description: String::new(),
                    status: FeatureStatus::Backlog,
                    sort_order: 0,
                },
            )
            .await
            .unwrap();
        let moved = store
            .update_feature(
                &cx,
                feature.id,
                FeatureFields {
                    title: "login".into(),
                    description: "oauth".into(),
                    status: FeatureStatus::InProgress,
                    sort_order: 0,
                },
                feature.version,
            )
            .await
            .unwrap();
        assert_eq!(moved.status, FeatureStatus::InProgress);
        assert_eq!(moved.version, 2);

        store.delete_milestone(&cx, early.id, 1).await.unwrap();
        assert!(store.get_feature(&cx, feature.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn roadmap_update_checks_version() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("p"))
            .await
            .unwrap();
        let rm = store
            .create_roadmap(&cx, project.id, roadmap("draft"))
            .await
            .unwrap();
        let mut fields = roadmap("live");
        fields.status = RoadmapStatus::Active;
        let live = store.update_roadmap(&cx, rm.id, fields.clone(), 1).await.unwrap();
        assert_eq!(live.version, 2);
        assert!(store.update_roadmap(&cx, rm.id, fields, 1).await.unwrap_err().is_conflict());
    }
}

mod branch_rules {
    use super::*;

    #[tokio::test]
    async fn first_enabled_match_wins() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("p"))
            .await
            .unwrap();

        let mut disabled = BranchRuleFields::for_pattern("release/*");
        disabled.enabled = false;
        store.create_branch_rule(&cx, project.id, disabled).await.unwrap();

        let mut strict = BranchRuleFields::for_pattern("release/*");
        strict.require_reviews = true;
        let strict = store.create_branch_rule(&cx, project.id, strict).await.unwrap();
        store
            .create_branch_rule(&cx, project.id, BranchRuleFields::for_pattern("*"))
            .await
            .unwrap();

        let hit = store
            .matching_branch_rule(&cx, project.id, "release/1.2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, strict.id);
        assert!(hit.require_reviews);

        let fallback = store
            .matching_branch_rule(&cx, project.id, "main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.branch_pattern, "*");
    }

    #[tokio::test]
    async fn no_rule_matches() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("p"))
            .await
            .unwrap();
        store
            .create_branch_rule(&cx, project.id, BranchRuleFields::for_pattern("main"))
            .await
            .unwrap();
        assert!(
            store
                .matching_branch_rule(&cx, project.id, "feature/x")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn invalid_glob_is_rejected() {
        let (store, cx) = open_store();
        let project = store
            .create_project(&cx, ProjectFields::named("p"))
            .await
            .unwrap();
        let err = store
            .create_branch_rule(&cx, project.id, BranchRuleFields::for_pattern("[oops"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
