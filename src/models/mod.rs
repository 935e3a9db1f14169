//! Built-in core models: every deployment gets these regardless of which
//! apps are installed.

pub mod cron;
pub mod organization;
pub mod role;
pub mod user;

use crate::model::ModelDef;

pub fn core_models() -> Vec<ModelDef> {
    vec![
        organization::organization(),
        user::user(),
        user::user_role(),
        role::role(),
        role::implied_role(),
        cron::cron(),
    ]
}
