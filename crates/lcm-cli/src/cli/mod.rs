pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(name = "lcm", about = "Manage Lantar Cipta Media site content")]
#[clap(version, author)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[clap(long, global = true)]
    pub json: bool,

    /// Use a throwaway in-memory service instead of the hosted one
    #[clap(long, global = true)]
    pub offline: bool,

    /// Log debug output to stderr
    #[clap(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in, sign out or show the current session
    #[clap(subcommand, name = "auth")]
    Auth(AuthCommands),

    /// Job applications
    #[clap(subcommand, name = "apps")]
    Apps(AppCommands),

    /// Downloadable documents
    #[clap(subcommand, name = "docs")]
    Docs(DocCommands),

    /// Frequently asked questions
    #[clap(subcommand, name = "faqs")]
    Faqs(FaqCommands),

    /// Portfolio projects
    #[clap(subcommand, name = "projects")]
    Projects(ProjectCommands),

    /// Follow a collection and print every change until Ctrl-C
    #[clap(name = "watch")]
    Watch {
        #[clap(value_enum)]
        collection: CollectionName,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectionName {
    Applications,
    Documents,
    Faqs,
    Projects,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email and password
    #[clap(name = "login")]
    Login {
        email: String,
    },

    /// Forget the stored session
    #[clap(name = "logout")]
    Logout,

    /// Show the stored session
    #[clap(name = "status")]
    Status,
}

/// Search options shared by the list commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SearchArgs {
    /// Only show records containing this text
    #[clap(long, short)]
    pub search: Option<String>,

    /// Rank by fuzzy match instead of plain substring search
    #[clap(long)]
    pub fuzzy: bool,
}

#[derive(Subcommand)]
pub enum AppCommands {
    /// List applications, newest first
    #[clap(name = "list", alias = "ls")]
    List {
        #[clap(flatten)]
        search: SearchArgs,
        /// pending, reviewed, accepted or rejected
        #[clap(long)]
        status: Option<String>,
    },

    /// Submit an application with a CV
    #[clap(name = "submit")]
    Submit {
        #[clap(long)]
        nik: String,
        #[clap(long)]
        name: String,
        #[clap(long)]
        email: String,
        #[clap(long)]
        phone: String,
        #[clap(long)]
        education: String,
        /// Birth date as YYYY-MM-DD
        #[clap(long)]
        birth_date: String,
        /// Position applied for; repeat for several
        #[clap(long = "position", required = true)]
        positions: Vec<String>,
        /// CV file (.pdf, .doc or .docx)
        #[clap(long)]
        cv: PathBuf,
    },

    /// Set the review status of an application
    #[clap(name = "status")]
    Status {
        id: String,
        status: String,
    },

    /// Delete an application and its CV
    #[clap(name = "rm")]
    Remove {
        id: String,
        /// Skip the confirmation prompt
        #[clap(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum DocCommands {
    /// List documents, newest first
    #[clap(name = "list", alias = "ls")]
    List {
        #[clap(flatten)]
        search: SearchArgs,
        #[clap(long)]
        category: Option<String>,
        /// Print the distinct categories instead
        #[clap(long)]
        categories: bool,
    },

    #[clap(name = "add")]
    Add {
        #[clap(long)]
        title: String,
        #[clap(long)]
        description: String,
        #[clap(long)]
        category: String,
        #[clap(long)]
        drive_url: String,
        #[clap(long)]
        file_type: String,
        #[clap(long)]
        file_size: String,
    },

    #[clap(name = "update")]
    Update {
        id: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        category: Option<String>,
        #[clap(long)]
        drive_url: Option<String>,
        #[clap(long)]
        file_type: Option<String>,
        #[clap(long)]
        file_size: Option<String>,
    },

    #[clap(name = "rm")]
    Remove {
        id: String,
        #[clap(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum FaqCommands {
    /// List FAQs in display order
    #[clap(name = "list", alias = "ls")]
    List {
        #[clap(flatten)]
        search: SearchArgs,
        #[clap(long)]
        category: Option<String>,
    },

    #[clap(name = "add")]
    Add {
        #[clap(long)]
        question: String,
        #[clap(long)]
        answer: String,
        /// General, Services, Support or Technical
        #[clap(long, default_value = "General")]
        category: String,
        /// Display rank; defaults to the end of the list
        #[clap(long)]
        order: Option<i32>,
    },

    #[clap(name = "update")]
    Update {
        id: String,
        #[clap(long)]
        question: Option<String>,
        #[clap(long)]
        answer: Option<String>,
        #[clap(long)]
        category: Option<String>,
        #[clap(long)]
        order: Option<i32>,
    },

    #[clap(name = "rm")]
    Remove {
        id: String,
        #[clap(long, short)]
        yes: bool,
    },

    /// Swap a FAQ with its neighbour
    #[clap(name = "move")]
    Move {
        id: String,
        /// up or down
        direction: String,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// List projects, newest first
    #[clap(name = "list", alias = "ls")]
    List {
        #[clap(flatten)]
        search: SearchArgs,
        #[clap(long)]
        category: Option<String>,
    },

    #[clap(name = "add")]
    Add {
        #[clap(long)]
        title: String,
        /// Software Development, Mobile App, Multimedia or Networking
        #[clap(long)]
        category: String,
        #[clap(long)]
        description: String,
        /// Cover image URL
        #[clap(long)]
        image: String,
        /// Tag; repeat for several
        #[clap(long = "tag")]
        tags: Vec<String>,
    },

    #[clap(name = "update")]
    Update {
        id: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        category: Option<String>,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        image: Option<String>,
        /// Replace the tags; repeat for several
        #[clap(long = "tag")]
        tags: Option<Vec<String>>,
    },

    #[clap(name = "rm")]
    Remove {
        id: String,
        #[clap(long, short)]
        yes: bool,
    },
}
