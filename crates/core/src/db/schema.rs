//! Database schema initialization (breaking changes allowed, no migrations)
//!
//! Hybrid ID Strategy:
//! - INTEGER PRIMARY KEYS give every table a stable insertion order
//! - UUID v7 `public_id` columns are the identifiers the API exposes
//! - Foreign keys reference `public_id` so cascades follow project deletion
//!
//! Every row carries `tenant_id`; queries always filter on it.

use rusqlite::Connection;

/// Tables owned by a tenant, children before parents, for tenant purges.
pub(crate) const TENANT_TABLES: &[&str] = &[
    "refresh_tokens",
    "reviews",
    "review_policies",
    "audit_entries",
    "agent_events",
    "event_streams",
    "plan_steps",
    "execution_plans",
    "runs",
    "features",
    "milestones",
    "roadmaps",
    "branch_protection_rules",
    "projects",
];

/// Create every table and index if it does not exist yet.
pub fn init_schema(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        -- ========================================================================
        -- VERSIONED ENTITIES
        -- ========================================================================

        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            repo_url TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_projects_tenant ON projects(tenant_id);

        CREATE TABLE IF NOT EXISTS roadmaps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_roadmaps_project ON roadmaps(tenant_id, project_id);

        CREATE TABLE IF NOT EXISTS milestones (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            roadmap_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(roadmap_id) REFERENCES roadmaps(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_milestones_roadmap ON milestones(tenant_id, roadmap_id);

        CREATE TABLE IF NOT EXISTS features (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            milestone_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(milestone_id) REFERENCES milestones(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_features_milestone ON features(tenant_id, milestone_id);

        CREATE TABLE IF NOT EXISTS branch_protection_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            branch_pattern TEXT NOT NULL,
            require_reviews INTEGER NOT NULL DEFAULT 0,
            require_tests INTEGER NOT NULL DEFAULT 0,
            allow_force_push INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_branch_rules_project ON branch_protection_rules(tenant_id, project_id);

        -- ========================================================================
        -- RUNS & PLANS
        -- ========================================================================

        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            task_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            team_id TEXT,
            policy_profile TEXT NOT NULL DEFAULT '',
            exec_mode TEXT NOT NULL DEFAULT '',
            deliver_mode TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            step_count INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            tokens_in INTEGER NOT NULL DEFAULT 0,
            tokens_out INTEGER NOT NULL DEFAULT 0,
            model TEXT NOT NULL DEFAULT '',
            output TEXT NOT NULL DEFAULT '',
            error TEXT NOT NULL DEFAULT '',
            version INTEGER NOT NULL DEFAULT 1,
            started_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_runs_task ON runs(tenant_id, task_id);
        CREATE INDEX IF NOT EXISTS idx_runs_active ON runs(status) WHERE status IN ('pending', 'running');

        CREATE TABLE IF NOT EXISTS execution_plans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            team_id TEXT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            protocol TEXT NOT NULL,
            failure_policy TEXT NOT NULL,
            status TEXT NOT NULL,
            max_parallel INTEGER NOT NULL CHECK (max_parallel >= 1),
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_plans_project ON execution_plans(tenant_id, project_id);

        -- depends_on is a JSON array of sibling public_ids. Step ids come from
        -- callers, so uniqueness is per tenant.
        CREATE TABLE IF NOT EXISTS plan_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            plan_id TEXT NOT NULL,
            task_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            policy_profile TEXT NOT NULL DEFAULT '',
            deliver_mode TEXT NOT NULL DEFAULT '',
            depends_on TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            run_id TEXT,
            round INTEGER NOT NULL CHECK (round >= 1),
            error TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (tenant_id, public_id),
            UNIQUE (tenant_id, run_id),
            FOREIGN KEY(plan_id) REFERENCES execution_plans(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_plan_steps_plan ON plan_steps(plan_id, round, id);

        -- ========================================================================
        -- EVENT LEDGER (append-only)
        -- ========================================================================

        -- One counter row per (tenant, scope); scope is run:<id>, task:<id> or agent:<id>
        CREATE TABLE IF NOT EXISTS event_streams (
            tenant_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            project_id TEXT NOT NULL,
            last_version INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, scope),
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        -- created_at is unix milliseconds so range filters compare numerically
        CREATE TABLE IF NOT EXISTS agent_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            version INTEGER NOT NULL,
            agent_id TEXT NOT NULL,
            task_id TEXT,
            project_id TEXT NOT NULL,
            run_id TEXT,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            request_id TEXT NOT NULL DEFAULT '',
            tool_name TEXT,
            model TEXT,
            tokens_in INTEGER,
            tokens_out INTEGER,
            cost_usd REAL,
            created_at INTEGER NOT NULL,
            UNIQUE (tenant_id, scope, version),
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_agent_events_run ON agent_events(tenant_id, run_id, version);
        CREATE INDEX IF NOT EXISTS idx_agent_events_task ON agent_events(tenant_id, task_id);
        CREATE INDEX IF NOT EXISTS idx_agent_events_agent ON agent_events(tenant_id, agent_id);

        CREATE TABLE IF NOT EXISTS audit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            run_id TEXT,
            agent_id TEXT,
            action TEXT NOT NULL,
            details TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_audit_project ON audit_entries(tenant_id, project_id, id);

        -- ========================================================================
        -- REVIEW POLICIES
        -- ========================================================================

        CREATE TABLE IF NOT EXISTS review_policies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            commit_threshold INTEGER,
            cron_expr TEXT,
            branch_pattern TEXT,
            template_id TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            commit_counter INTEGER NOT NULL DEFAULT 0,
            -- counter value at the most recent threshold crossing, 0 otherwise
            last_crossing INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_review_policies_trigger
            ON review_policies(tenant_id, project_id, trigger_type, id) WHERE enabled = 1;

        CREATE TABLE IF NOT EXISTS reviews (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            policy_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            plan_id TEXT UNIQUE,
            status TEXT NOT NULL,
            trigger_ref TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            completed_at TEXT,
            FOREIGN KEY(policy_id) REFERENCES review_policies(public_id) ON DELETE CASCADE,
            FOREIGN KEY(project_id) REFERENCES projects(public_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_reviews_project ON reviews(tenant_id, project_id);

        -- ========================================================================
        -- AUTH
        -- ========================================================================

        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE NOT NULL,
            tenant_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            token_hash TEXT UNIQUE NOT NULL,
            expires_at INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(tenant_id, user_id);
        "#,
    )?;

    Ok(())
}
