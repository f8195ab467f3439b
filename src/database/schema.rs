pub const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS art_styles (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        style_string TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS positive_prompts (
        id INTEGER PRIMARY KEY,
        prompt_hash TEXT UNIQUE NOT NULL,
        prompt_text TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS negative_prompts (
        id INTEGER PRIMARY KEY,
        prompt_hash TEXT UNIQUE NOT NULL,
        prompt_text TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS prompt_combinations (
        id INTEGER PRIMARY KEY,
        positive_prompt_id INTEGER,
        negative_prompt_id INTEGER,
        combination_hash TEXT UNIQUE NOT NULL,
        FOREIGN KEY(positive_prompt_id) REFERENCES positive_prompts(id) ON DELETE CASCADE,
        FOREIGN KEY(negative_prompt_id) REFERENCES negative_prompts(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS titles (
        id INTEGER PRIMARY KEY,
        title_hash TEXT UNIQUE NOT NULL,
        title_text TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY,
        filename TEXT UNIQUE NOT NULL,
        prompt_combination_id INTEGER,
        art_style_id INTEGER,
        title_id INTEGER,
        seed TEXT,
        date_downloaded TEXT,
        deleted INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY(prompt_combination_id) REFERENCES prompt_combinations(id) ON DELETE SET NULL,
        FOREIGN KEY(art_style_id) REFERENCES art_styles(id) ON DELETE SET NULL,
        FOREIGN KEY(title_id) REFERENCES titles(id) ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS idx_images_deleted ON images(deleted);
    CREATE INDEX IF NOT EXISTS idx_images_combination ON images(prompt_combination_id);

    CREATE TABLE IF NOT EXISTS tokens (
        id INTEGER PRIMARY KEY,
        token TEXT UNIQUE NOT NULL CHECK(length(token) <= 255),
        positive_count INTEGER NOT NULL DEFAULT 0,
        negative_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS image_tokens (
        image_id INTEGER NOT NULL,
        token_id INTEGER NOT NULL,
        polarity INTEGER NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE,
        FOREIGN KEY(token_id) REFERENCES tokens(id) ON DELETE CASCADE,
        PRIMARY KEY(image_id, token_id, polarity)
    );

    CREATE INDEX IF NOT EXISTS idx_image_tokens_token ON image_tokens(token_id);
";

/// Tables reported after an import, in dependency order.
pub const TABLES: [&str; 8] = [
    "art_styles",
    "positive_prompts",
    "negative_prompts",
    "prompt_combinations",
    "titles",
    "images",
    "tokens",
    "image_tokens",
];
