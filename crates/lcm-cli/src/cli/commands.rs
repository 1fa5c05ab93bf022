use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use colored::Colorize;
use dialoguer::{Confirm, Password};
use lcm_client::{HttpService, RealtimeOptions};
use lcm_core::filter::{categories, filter_status, fuzzy_rank, RecordFilter, Searchable};
use lcm_core::models::{
    DocumentPatch, FaqPatch, NewApplication, NewDocument, NewFaq, NewProject, ProjectPatch,
};
use lcm_core::{
    Application, ApplicationStatus, Attachment, CollectionSync, Config, Direction, Document,
    Entity, Faq, InMemoryService, Project, RecordKey, RemoteService, State, SyncPhase,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{
    AppCommands, AuthCommands, CollectionName, DocCommands, FaqCommands, ProjectCommands,
    SearchArgs,
};

/// The service a command talks to, plus the loaded configuration
pub struct Backend {
    pub config: Config,
    pub service: Arc<dyn RemoteService>,
    http: Option<Arc<HttpService>>,
}

impl Backend {
    pub fn connect(offline: bool) -> Result<Self> {
        let config = Config::load()?;
        if offline {
            return Ok(Self {
                config,
                service: Arc::new(InMemoryService::for_site()),
                http: None,
            });
        }

        let endpoint = config.resolved_service()?;
        let state = State::load()?;
        let realtime = RealtimeOptions {
            reconnect: Duration::from_secs(config.realtime.reconnect_seconds),
            heartbeat: Duration::from_secs(config.realtime.heartbeat_seconds),
        };
        let http = Arc::new(
            HttpService::new(&endpoint.url, &endpoint.anon_key)?
                .with_access_token(state.access_token().map(str::to_string))
                .with_realtime(realtime),
        );
        Ok(Self {
            config,
            service: http.clone(),
            http: Some(http),
        })
    }

    pub fn is_offline(&self) -> bool {
        self.http.is_none()
    }

    fn http(&self) -> Result<&HttpService> {
        match &self.http {
            Some(http) => Ok(http.as_ref()),
            None => bail!("This command needs the hosted service; drop --offline"),
        }
    }

    fn sync<E: Entity>(&self) -> CollectionSync<E> {
        CollectionSync::new(self.service.clone())
    }

    /// Fetch a collection once, failing if the fetch failed
    async fn load<E: Entity>(&self) -> Result<CollectionSync<E>> {
        let sync = self.sync::<E>();
        sync.refresh().await;
        if let Some(err) = sync.error() {
            return Err(err).with_context(|| format!("Failed to load {}", E::COLLECTION));
        }
        Ok(sync)
    }
}

fn parse_key(id: &str) -> RecordKey {
    match id.parse() {
        Ok(key) => key,
        Err(never) => match never {},
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

/// Apply the search options to a snapshot
fn search<'a, R: Searchable>(
    records: &'a [R],
    args: &SearchArgs,
    category: Option<&str>,
    threshold: i64,
) -> Vec<&'a R> {
    let by_category = RecordFilter::new(None, category);
    match (&args.search, args.fuzzy) {
        (Some(query), true) => fuzzy_rank(records, query, threshold)
            .into_iter()
            .filter(|r| by_category.matches(*r))
            .collect(),
        (query, _) => RecordFilter::new(query.as_deref(), category).apply(records),
    }
}

fn status_label(status: ApplicationStatus) -> colored::ColoredString {
    match status {
        ApplicationStatus::Pending => status.as_str().yellow(),
        ApplicationStatus::Reviewed => status.as_str().blue(),
        ApplicationStatus::Accepted => status.as_str().green(),
        ApplicationStatus::Rejected => status.as_str().red(),
    }
}

fn print_application(app: &Application) {
    println!(
        "{} {} <{}> {}",
        app.id.to_string().dimmed(),
        app.full_name.cyan().bold(),
        app.email,
        status_label(app.status)
    );
    println!(
        "    NIK {} | {} | born {} | {}",
        app.nik,
        app.education,
        app.birth_date,
        app.positions.join(", ")
    );
    println!("    {}", app.cv_url.dimmed());
}

fn print_document(doc: &Document) {
    println!(
        "{} {} [{}] {} {}",
        doc.id.to_string().dimmed(),
        doc.title.cyan().bold(),
        doc.category,
        doc.file_type,
        doc.file_size.dimmed()
    );
    if !doc.description.is_empty() {
        println!("    {}", doc.description);
    }
}

fn print_faq(faq: &Faq) {
    println!(
        "{:>3} {} {} [{}]",
        faq.order.to_string().dimmed(),
        format!("#{}", faq.id).dimmed(),
        faq.question.cyan().bold(),
        faq.category
    );
    println!("    {}", faq.answer);
}

fn print_project(project: &Project) {
    let tags = if project.tags.is_empty() {
        String::new()
    } else {
        format!(" ({})", project.tags.join(", "))
    };
    println!(
        "{} {} [{}]{}",
        format!("#{}", project.id).dimmed(),
        project.title.cyan().bold(),
        project.category,
        tags.dimmed()
    );
    println!("    {}", project.description);
}

fn print_records<R: Serialize>(
    records: &[&R],
    json: bool,
    empty: &str,
    print: fn(&R),
) -> Result<()> {
    if json {
        return print_json(records);
    }
    if records.is_empty() {
        println!("{empty}");
        return Ok(());
    }
    for record in records {
        print(record);
    }
    Ok(())
}

fn report_created(collection: &str, key: &RecordKey, json: bool) -> Result<()> {
    if json {
        print_json(&serde_json::json!({ "status": "created", "collection": collection, "id": key }))
    } else {
        println!("Created {} record {}", collection, key.to_string().green());
        Ok(())
    }
}

fn report_done(action: &str, collection: &str, key: &RecordKey, json: bool) -> Result<()> {
    if json {
        print_json(&serde_json::json!({ "status": action, "collection": collection, "id": key }))
    } else {
        println!("{} {} record {}", capitalize(action), collection, key.to_string().green());
        Ok(())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Only login needs the service; the other auth commands work on stored state
pub async fn handle_auth_command(cmd: &AuthCommands, offline: bool, json: bool) -> Result<()> {
    match cmd {
        AuthCommands::Login { email } => {
            let backend = Backend::connect(offline)?;
            let http = backend.http()?;
            let password = Password::new()
                .with_prompt(format!("Password for {email}"))
                .interact()?;
            let session = http
                .sign_in(email, &password)
                .await
                .context("Sign in failed")?;
            let mut state = State::load()?;
            state.store_session(
                session.email.clone(),
                session.access_token,
                session.refresh_token,
                session.expires_at,
            );
            state.save()?;
            if json {
                print_json(&serde_json::json!({
                    "status": "signed_in",
                    "email": session.email,
                    "expires_at": session.expires_at,
                }))?;
            } else {
                println!(
                    "Signed in as {} until {}",
                    session.email.cyan(),
                    session.expires_at.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }
        AuthCommands::Logout => {
            let mut state = State::load()?;
            state.clear_session();
            state.save()?;
            if json {
                print_json(&serde_json::json!({ "status": "signed_out" }))?;
            } else {
                println!("Signed out");
            }
        }
        AuthCommands::Status => {
            let state = State::load()?;
            let valid = state.is_session_valid();
            if json {
                print_json(&serde_json::json!({
                    "signed_in": valid,
                    "email": state.auth.email,
                    "expires_at": state.auth.expires_at,
                }))?;
            } else if valid {
                println!(
                    "Signed in as {}",
                    state.auth.email.as_deref().unwrap_or("unknown").cyan()
                );
            } else if state.auth.access_token.is_some() {
                println!("Session expired, run 'lcm auth login <email>'");
            } else {
                println!("Not signed in; requests use the anon key");
            }
        }
    }
    Ok(())
}

pub async fn handle_app_command(backend: &Backend, cmd: &AppCommands, json: bool) -> Result<()> {
    match cmd {
        AppCommands::List { search: args, status } => {
            let status = status
                .as_deref()
                .map(str::parse::<ApplicationStatus>)
                .transpose()?;
            let sync = backend.load::<Application>().await?;
            let records = sync.records();
            let by_status: Vec<Application> =
                filter_status(&records, status).into_iter().cloned().collect();
            let hits = search(&by_status, args, None, backend.config.search.threshold);
            print_records(&hits, json, "No applications found", print_application)
        }
        AppCommands::Submit {
            nik,
            name,
            email,
            phone,
            education,
            birth_date,
            positions,
            cv,
        } => {
            let birth_date = NaiveDate::parse_from_str(birth_date, "%Y-%m-%d")
                .with_context(|| format!("Invalid birth date '{birth_date}', expected YYYY-MM-DD"))?;
            let fields = NewApplication {
                nik: nik.clone(),
                full_name: name.clone(),
                email: email.clone(),
                phone: phone.clone(),
                education: education.clone(),
                birth_date,
                positions: positions.clone(),
            };
            let attachment = read_attachment(cv)?;
            let settings = backend.config.upload_settings();
            let receipt = backend
                .sync::<Application>()
                .submit_application(fields, attachment, &settings)
                .await?;
            if json {
                print_json(&serde_json::json!({
                    "status": "submitted",
                    "id": receipt.key,
                    "cv_url": receipt.cv_url,
                }))
            } else {
                println!("Application {} submitted", receipt.key.to_string().green());
                println!("    CV at {}", receipt.cv_url.dimmed());
                Ok(())
            }
        }
        AppCommands::Status { id, status } => {
            let status: ApplicationStatus = status.parse()?;
            let key = parse_key(id);
            backend
                .sync::<Application>()
                .update_status(&key, status)
                .await?;
            if json {
                print_json(&serde_json::json!({ "status": "updated", "id": key, "application_status": status }))
            } else {
                println!("Application {} is now {}", key, status_label(status));
                Ok(())
            }
        }
        AppCommands::Remove { id, yes } => {
            let key = parse_key(id);
            let sync = backend.load::<Application>().await?;
            let app = match sync.snapshot().find(&key) {
                Some(app) => app.clone(),
                None => bail!("No application with id {key}"),
            };
            if !confirm(&format!("Delete the application of {}?", app.full_name), *yes)? {
                return Ok(());
            }
            let settings = backend.config.upload_settings();
            let report = sync
                .delete_application(&key, &app.cv_url, &settings)
                .await?;
            if let Some(orphan) = &report.orphan {
                eprintln!("{} {}", "warning:".yellow().bold(), orphan);
            }
            report_done("deleted", Application::COLLECTION, &key, json)
        }
    }
}

fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read CV file: {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("CV path has no file name")?;
    Ok(Attachment::new(file_name, bytes))
}

pub async fn handle_doc_command(backend: &Backend, cmd: &DocCommands, json: bool) -> Result<()> {
    match cmd {
        DocCommands::List {
            search: args,
            category,
            categories: only_categories,
        } => {
            let sync = backend.load::<Document>().await?;
            let records = sync.records();
            if *only_categories {
                let names = categories(&records);
                if json {
                    return print_json(&names);
                }
                for name in names {
                    println!("{}", name);
                }
                return Ok(());
            }
            let hits = search(
                &records,
                args,
                category.as_deref(),
                backend.config.search.threshold,
            );
            print_records(&hits, json, "No documents found", print_document)
        }
        DocCommands::Add {
            title,
            description,
            category,
            drive_url,
            file_type,
            file_size,
        } => {
            let fields = NewDocument {
                title: title.clone(),
                description: description.clone(),
                category: category.clone(),
                drive_url: drive_url.clone(),
                file_type: file_type.clone(),
                file_size: file_size.clone(),
            };
            let key = backend.sync::<Document>().create(&fields).await?;
            report_created(Document::COLLECTION, &key, json)
        }
        DocCommands::Update {
            id,
            title,
            description,
            category,
            drive_url,
            file_type,
            file_size,
        } => {
            let key = parse_key(id);
            let patch = DocumentPatch {
                title: title.clone(),
                description: description.clone(),
                category: category.clone(),
                drive_url: drive_url.clone(),
                file_type: file_type.clone(),
                file_size: file_size.clone(),
            };
            backend.sync::<Document>().update(&key, &patch).await?;
            report_done("updated", Document::COLLECTION, &key, json)
        }
        DocCommands::Remove { id, yes } => {
            let key = parse_key(id);
            if !confirm(&format!("Delete document {key}?"), *yes)? {
                return Ok(());
            }
            backend.sync::<Document>().delete(&key).await?;
            report_done("deleted", Document::COLLECTION, &key, json)
        }
    }
}

pub async fn handle_faq_command(backend: &Backend, cmd: &FaqCommands, json: bool) -> Result<()> {
    match cmd {
        FaqCommands::List {
            search: args,
            category,
        } => {
            let sync = backend.load::<Faq>().await?;
            let records = sync.records();
            let hits = search(
                &records,
                args,
                category.as_deref(),
                backend.config.search.threshold,
            );
            print_records(&hits, json, "No FAQs found", print_faq)
        }
        FaqCommands::Add {
            question,
            answer,
            category,
            order,
        } => {
            let sync = match order {
                Some(_) => backend.sync::<Faq>(),
                None => backend.load::<Faq>().await?,
            };
            let fields = NewFaq {
                question: question.clone(),
                answer: answer.clone(),
                category: category.clone(),
                order: order.unwrap_or_else(|| sync.next_order()),
            };
            let key = sync.create(&fields).await?;
            report_created(Faq::COLLECTION, &key, json)
        }
        FaqCommands::Update {
            id,
            question,
            answer,
            category,
            order,
        } => {
            let key = parse_key(id);
            let patch = FaqPatch {
                question: question.clone(),
                answer: answer.clone(),
                category: category.clone(),
                order: *order,
            };
            backend.sync::<Faq>().update(&key, &patch).await?;
            report_done("updated", Faq::COLLECTION, &key, json)
        }
        FaqCommands::Remove { id, yes } => {
            let key = parse_key(id);
            if !confirm(&format!("Delete FAQ {key}?"), *yes)? {
                return Ok(());
            }
            backend.sync::<Faq>().delete(&key).await?;
            report_done("deleted", Faq::COLLECTION, &key, json)
        }
        FaqCommands::Move { id, direction } => {
            let key = parse_key(id);
            let direction: Direction = direction.parse()?;
            let sync = backend.load::<Faq>().await?;
            let moved = sync.move_faq(&key, direction).await?;
            if json {
                print_json(&serde_json::json!({ "moved": moved, "id": key, "direction": direction.to_string() }))
            } else if moved {
                println!("Moved FAQ {} {}", key.to_string().green(), direction);
                Ok(())
            } else {
                println!("FAQ {} cannot move {}", key, direction);
                Ok(())
            }
        }
    }
}

pub async fn handle_project_command(
    backend: &Backend,
    cmd: &ProjectCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        ProjectCommands::List {
            search: args,
            category,
        } => {
            let sync = backend.load::<Project>().await?;
            let records = sync.records();
            let hits = search(
                &records,
                args,
                category.as_deref(),
                backend.config.search.threshold,
            );
            print_records(&hits, json, "No projects found", print_project)
        }
        ProjectCommands::Add {
            title,
            category,
            description,
            image,
            tags,
        } => {
            let mut fields = NewProject {
                title: title.clone(),
                category: category.clone(),
                description: description.clone(),
                image: image.clone(),
                tags: Vec::new(),
            };
            for tag in tags {
                fields.add_tag(tag);
            }
            let key = backend.sync::<Project>().create(&fields).await?;
            report_created(Project::COLLECTION, &key, json)
        }
        ProjectCommands::Update {
            id,
            title,
            category,
            description,
            image,
            tags,
        } => {
            let key = parse_key(id);
            let patch = ProjectPatch {
                title: title.clone(),
                category: category.clone(),
                description: description.clone(),
                image: image.clone(),
                tags: tags.clone(),
            };
            backend.sync::<Project>().update(&key, &patch).await?;
            report_done("updated", Project::COLLECTION, &key, json)
        }
        ProjectCommands::Remove { id, yes } => {
            let key = parse_key(id);
            if !confirm(&format!("Delete project {key}?"), *yes)? {
                return Ok(());
            }
            backend.sync::<Project>().delete(&key).await?;
            report_done("deleted", Project::COLLECTION, &key, json)
        }
    }
}

pub async fn watch(backend: &Backend, collection: CollectionName, json: bool) -> Result<()> {
    match collection {
        CollectionName::Applications => watch_collection::<Application>(backend, json).await,
        CollectionName::Documents => watch_collection::<Document>(backend, json).await,
        CollectionName::Faqs => watch_collection::<Faq>(backend, json).await,
        CollectionName::Projects => watch_collection::<Project>(backend, json).await,
    }
}

async fn watch_collection<E: Entity>(backend: &Backend, json: bool) -> Result<()> {
    let mut sync = backend.sync::<E>();
    sync.activate().await;
    let mut rx = sync.watch();
    if !json {
        println!(
            "Watching {} (Ctrl-C to stop)",
            E::COLLECTION.cyan().bold()
        );
    }

    loop {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.phase == SyncPhase::Ready {
            if json {
                print_json(&serde_json::json!({
                    "collection": E::COLLECTION,
                    "generation": snapshot.generation,
                    "records": snapshot.records,
                    "error": snapshot.error.as_ref().map(|e| e.to_string()),
                }))?;
            } else {
                let line = format!(
                    "[{}] {} records",
                    snapshot.generation,
                    snapshot.records.len()
                );
                match &snapshot.error {
                    Some(err) => println!("{} {}", line, err.to_string().red()),
                    None => println!("{}", line),
                }
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sync.deactivate();
    Ok(())
}
