use anyhow::{Context, Result};
use dialoguer::{Confirm, Input};

// Função para solicitar entrada de texto
pub fn prompt_input(prompt: &str) -> Result<String> {
    let input = Input::<String>::new()
        .with_prompt(prompt)
        .interact_text()
        .context("Falha ao obter entrada")?;

    Ok(input.trim().to_string())
}

// Função para confirmar uma ação (sim/não)
pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()
        .context("Falha ao obter confirmação")
}
