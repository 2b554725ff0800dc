mod correlation;
mod phased_init;
mod support;
