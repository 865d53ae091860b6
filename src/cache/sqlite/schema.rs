/// Tables for every entity type, applied on bind.
///
/// Foreign keys document the relations but are not enforced; entities are
/// cached in whatever order the API returns them.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organization (
    created TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    timestamp TEXT NOT NULL,
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workspace (
    created TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    timestamp TEXT NOT NULL,
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    organization INTEGER
);

CREATE TABLE IF NOT EXISTS client (
    created TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    timestamp TEXT NOT NULL,
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    workspace INTEGER REFERENCES workspace(id)
);

CREATE TABLE IF NOT EXISTS project (
    created TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    timestamp TEXT NOT NULL,
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    workspace INTEGER REFERENCES workspace(id),
    color TEXT NOT NULL,
    client INTEGER REFERENCES client(id),
    active INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT
);

CREATE TABLE IF NOT EXISTS tag (
    created TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    timestamp TEXT NOT NULL,
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    workspace INTEGER REFERENCES workspace(id)
);

CREATE TABLE IF NOT EXISTS tracker (
    created TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    timestamp TEXT NOT NULL,
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    workspace INTEGER REFERENCES workspace(id),
    start TEXT NOT NULL,
    duration INTEGER,
    stop TEXT,
    project INTEGER REFERENCES project(id)
);

CREATE TABLE IF NOT EXISTS tracker_tag (
    tracker INTEGER NOT NULL REFERENCES tracker(id),
    tag INTEGER NOT NULL REFERENCES tag(id),
    PRIMARY KEY (tracker, tag)
);

CREATE INDEX IF NOT EXISTS idx_tracker_timestamp ON tracker(timestamp);
CREATE INDEX IF NOT EXISTS idx_tracker_tag_tag ON tracker_tag(tag);
"#;
