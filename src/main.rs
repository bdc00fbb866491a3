use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};

use crate::core::{
    attendee::{search, AttendeeStats, ColumnSelection, ProfilePicture},
    db::{find_attendee, MemoryStore, RecordStore, SqliteStore},
    export::generate_export,
    factory::RecordFactory,
    intake::{validate, IntakeRules, RegistrationForm},
    settings::Settings,
    ticket::{generate_ticket_document, render_ticket_visual, ticket_number, TicketPayload},
    Download,
};

mod core;
mod error;
mod util;
mod web;

#[derive(Parser, Debug)]
#[command(name = "TeaGathering")]
#[command(version = "0.1")]
#[command(about = "Registration, tickets and attendee exports for the Tea Gathering.", long_about = None)]
struct Args {
    /// Json settings file. Defaults are used when it does not exist.
    #[arg(long, global = true, default_value = "settings.json")]
    settings: PathBuf,

    /// Keep registrations in memory for the lifetime of the process.
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: RunType,
}

#[derive(clap::Args, Debug)]
struct RegisterArgs {
    #[arg(long, default_value = "")]
    full_name: String,

    #[arg(long, default_value = "")]
    contact_number: String,

    #[arg(long, default_value = "")]
    company_name: String,

    #[arg(long, default_value = "")]
    current_position: String,

    /// One of 011 to 076.
    #[arg(long, default_value = "")]
    batch: String,

    #[arg(long, default_value = "")]
    student_id: String,

    #[arg(long, default_value = "")]
    email: String,

    #[arg(long, default_value = "")]
    address: String,

    /// Profile picture file.
    #[arg(long)]
    photo: Option<PathBuf>,
}

impl From<&RegisterArgs> for RegistrationForm {
    fn from(args: &RegisterArgs) -> Self {
        RegistrationForm {
            full_name: args.full_name.clone(),
            contact_number: args.contact_number.clone(),
            company_name: args.company_name.clone(),
            current_position: args.current_position.clone(),
            batch: args.batch.clone(),
            student_id: args.student_id.clone(),
            email: args.email.clone(),
            address: args.address.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum RunType {
    /// Run the registration web server.
    Serve,

    /// Register an attendee. Every invalid field is reported at once.
    Register(RegisterArgs),

    /// Print registered attendees.
    List {
        /// Case-insensitive match on name, email, student ID, batch or contact number.
        #[arg(short = 'q', long)]
        search: Option<String>,
    },

    /// Print dashboard counters.
    Stats,

    /// Write the ticket document of a registration into the output directory.
    Ticket {
        id: String,

        /// Also write the ticket visual as svg.
        #[arg(long)]
        svg: bool,
    },

    /// Write the attendee spreadsheet into the output directory.
    Export {
        /// Fields to export, e.g. fullName,email,batch.
        #[arg(short, long)]
        fields: Option<String>,

        #[arg(short = 'q', long)]
        search: Option<String>,
    },
}

async fn open_store(settings: &Settings, ephemeral: bool) -> anyhow::Result<Arc<dyn RecordStore>> {
    if ephemeral {
        log::info!("Using in-memory attendee store");
        Ok(Arc::new(MemoryStore::default()))
    } else {
        let file = settings.database_file();
        log::info!("Using attendee store {}", file.display());
        Ok(Arc::new(SqliteStore::open(&file).await?))
    }
}

async fn write_output(dir: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

async fn write_download(dir: &Path, download: &Download) -> anyhow::Result<PathBuf> {
    write_output(dir, &download.file_name, &download.bytes).await
}

async fn register(
    args: &RegisterArgs,
    factory: &RecordFactory,
    settings: &Settings,
) -> anyhow::Result<()> {
    let picture = match &args.photo {
        Some(path) => Some(ProfilePicture::from_path(path).await?),
        None => None,
    };

    let draft = match validate(
        &RegistrationForm::from(args),
        picture,
        &IntakeRules::from_settings(settings),
    ) {
        Ok(draft) => draft,
        Err(errors) => {
            for (field, message) in errors.iter() {
                eprintln!("{}: {}", field, message);
            }
            anyhow::bail!("Registration rejected, {} fields need attention", errors.len());
        }
    };

    let record = factory.create(draft).await?;
    println!("Registered {}", record.full_name);
    println!("ID: {}", record.id);
    println!("Ticket: {}", ticket_number(&record.id));
    Ok(())
}

async fn list(store: &dyn RecordStore, term: Option<&str>) -> anyhow::Result<()> {
    let records = store.load().await?;
    let found = search(&records, term);

    for record in &found {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            ticket_number(&record.id),
            record.id,
            record.full_name,
            record.email,
            record.batch
        );
    }

    if term.is_some_and(|t| !t.trim().is_empty()) {
        println!("{} of {} attendees", found.len(), records.len());
    } else {
        println!("{} attendees", records.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let settings = Arc::new(Settings::load(&args.settings).await?);
    let store = open_store(&settings, args.ephemeral).await?;
    let factory = Arc::new(RecordFactory::new(store.clone()));

    match &args.command {
        RunType::Serve => web::run_http_server(factory, settings).await,
        RunType::Register(register_args) => register(register_args, &factory, &settings).await,
        RunType::List { search } => list(store.as_ref(), search.as_deref()).await,
        RunType::Stats => {
            let stats = AttendeeStats::from_records(&store.load().await?);
            println!("Registrations: {}", stats.registrations);
            println!("Batches: {}", stats.batches);
            println!("Companies: {}", stats.companies);
            println!("With profile picture: {}", stats.with_profile_pictures);
            Ok(())
        }
        RunType::Ticket { id, svg } => {
            let record = find_attendee(store.as_ref(), id).await?;
            let document = generate_ticket_document(
                &record,
                settings.ticket_pixel_ratio(),
                settings.contact_email(),
            )
            .await?;
            let path = write_download(&settings.output_dir(), &document).await?;
            println!("Ticket written to {}", path.display());

            if *svg {
                let visual = render_ticket_visual(&record, &TicketPayload::from_record(&record))?;
                let file_name = Path::new(&document.file_name).with_extension("svg");
                let path = write_output(
                    &settings.output_dir(),
                    &file_name.to_string_lossy(),
                    visual.to_svg().as_bytes(),
                )
                .await?;
                println!("Ticket visual written to {}", path.display());
            }
            Ok(())
        }
        RunType::Export { fields, search: term } => {
            let selection = match fields {
                Some(fields) => ColumnSelection::parse(fields).map_err(anyhow::Error::msg)?,
                None => ColumnSelection::default(),
            };
            let records = store.load().await?;
            let matching = search(&records, term.as_deref())
                .into_iter()
                .cloned()
                .collect();
            let download =
                generate_export(matching, selection, settings.date_format().to_owned()).await?;
            let path = write_download(&settings.output_dir(), &download).await?;
            println!("Export written to {}", path.display());
            Ok(())
        }
    }
}
